
use chrono::NaiveDate;
use serde_json::Value;

/// Placeholder the upstream puts in empty fraction/price cells.
pub const SENTINEL: &str = "-";

// ── Field access ──────────────────────────────────────────────────────────────

/// Read a field as text. Numbers are rendered, blanks and other types are absent.
/// {"rate": 12.5} → "12.5" | {"rate": " "} → None
pub fn field_str(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Like [`field_str`] but falls back to the sentinel.
pub fn field_or_sentinel(obj: &Value, key: &str) -> String {
    field_str(obj, key).unwrap_or_else(|| SENTINEL.to_string())
}

pub fn is_sentinel(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s == SENTINEL
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a numeric cell. Missing or null is 0; unparsable text is an error.
/// "12.30%" → 12.3 | "1,234.5" → 1234.5 | null → 0.0 | "abc" → Err
pub fn parse_number(v: Option<&Value>) -> Result<f64, String> {
    match v {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("out of range: {}", n)),
        Some(Value::String(s)) => {
            let cleaned = s.trim().replace(['%', ','], "");
            if cleaned.is_empty() {
                return Ok(0.0);
            }
            cleaned.parse().map_err(|_| format!("not a number: {:?}", s))
        }
        Some(other) => Err(format!("not a number: {}", other)),
    }
}

/// Parse dates: "20240306" (upstream) or ISO
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }

    None
}

pub fn is_portfolio_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_str() {
        let obj = json!({"a": " x ", "b": 12.5, "c": "", "d": null, "e": [1]});
        assert_eq!(field_str(&obj, "a").as_deref(), Some("x"));
        assert_eq!(field_str(&obj, "b").as_deref(), Some("12.5"));
        assert_eq!(field_str(&obj, "c"), None);
        assert_eq!(field_str(&obj, "d"), None);
        assert_eq!(field_str(&obj, "e"), None);
        assert_eq!(field_or_sentinel(&obj, "missing"), "-");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(Some(&json!("12.30%"))), Ok(12.3));
        assert_eq!(parse_number(Some(&json!("1,234.5"))), Ok(1234.5));
        assert_eq!(parse_number(Some(&json!(3))), Ok(3.0));
        assert_eq!(parse_number(None), Ok(0.0));
        assert!(parse_number(Some(&json!("abc"))).is_err());
    }

    #[test]
    fn test_parse_date() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert_eq!(parse_date("20240306"), Some(d));
        assert_eq!(parse_date("2024-03-06"), Some(d));
        assert_eq!(parse_date("06/03/2024"), None);
    }

    #[test]
    fn test_sentinel_and_ids() {
        assert!(is_sentinel("-"));
        assert!(is_sentinel(" "));
        assert!(!is_sentinel("15.5%"));
        assert!(is_portfolio_id("100200"));
        assert!(!is_portfolio_id("12a"));
        assert!(!is_portfolio_id(""));
    }
}
