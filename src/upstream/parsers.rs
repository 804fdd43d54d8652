use super::cleaner::{field_or_sentinel, field_str, parse_date, parse_number};
use super::FetchError;
use crate::models::{HoldingChangeRecord, PortfolioDetail, Position, RankCategory, RankEntry};
use serde_json::{Map, Value};
use tracing::warn;

const SUCCESS: &str = "0";

/// Fields lifted out of a rank item; everything else lands in `extra`.
const RANK_FIELDS: [&str; 4] = ["zjzh", "zhuheName", "rateForApp", "rateTitle"];

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Validate the `{"result": "0", "data": ...}` envelope.
pub fn parse_envelope(body: &str) -> Result<Value, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|_| {
        let head: String = body.chars().take(100).collect();
        FetchError::Malformed(format!("not JSON: {}", head))
    })?;

    if !value.is_object() {
        return Err(FetchError::Malformed("envelope is not an object".into()));
    }

    match field_str(&value, "result") {
        Some(status) if status == SUCCESS => Ok(value),
        status => Err(FetchError::Upstream {
            status: status.unwrap_or_default(),
            message: field_str(&value, "message").unwrap_or_else(|| "Unknown error".into()),
        }),
    }
}

/// The `data` array of an envelope, empty when missing or of another shape.
pub fn data_items(envelope: &Value) -> &[Value] {
    envelope
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ── Rank list ─────────────────────────────────────────────────────────────────

/// Items without a portfolio id are dropped.
pub fn parse_rank_entry(item: &Value, category: RankCategory, rank: usize) -> Option<RankEntry> {
    let portfolio_id = field_str(item, "zjzh")?;

    let extra: Map<String, Value> = item
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| !RANK_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(RankEntry {
        portfolio_id,
        name: field_str(item, "zhuheName").unwrap_or_default(),
        rate: field_str(item, "rateForApp"),
        rate_title: field_str(item, "rateTitle"),
        rank,
        category,
        extra,
    })
}

// ── Holding changes ───────────────────────────────────────────────────────────

pub fn parse_holding_record(item: &Value) -> HoldingChangeRecord {
    HoldingChangeRecord {
        date: field_str(item, "tzrq").as_deref().and_then(parse_date),
        stock_code: field_str(item, "stkMktCode").unwrap_or_default(),
        stock_name: field_str(item, "stkName").unwrap_or_default(),
        buy_fraction: field_or_sentinel(item, "cwhj_mr"),
        sell_fraction: field_or_sentinel(item, "cwhj_mc"),
        buy_price: field_str(item, "cjjg_mr"),
        sell_price: field_str(item, "cjjg_mc"),
    }
}

// ── Portfolio detail ──────────────────────────────────────────────────────────

pub fn parse_portfolio_detail(portfolio_id: &str, envelope: &Value) -> Option<PortfolioDetail> {
    let data = envelope.get("data").filter(|d| d.is_object())?;
    let detail = data.get("detail").cloned().unwrap_or(Value::Null);

    let positions = data
        .get("position")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(|p| parse_position(portfolio_id, p)).collect())
        .unwrap_or_default();

    Some(PortfolioDetail {
        portfolio_id: portfolio_id.to_string(),
        name: field_str(&detail, "zuheName").unwrap_or_default(),
        manager: field_str(&detail, "uidNick").unwrap_or_default(),
        total_return: field_str(&detail, "rate").unwrap_or_default(),
        day_return: field_str(&detail, "rateDay").unwrap_or_default(),
        positions,
    })
}

fn parse_position(portfolio_id: &str, pos: &Value) -> Option<Position> {
    let numbers = (|| {
        Ok::<_, String>((
            parse_number(pos.get("cbj"))?,
            parse_number(pos.get("__zxjg"))?,
            parse_number(pos.get("webYkRate"))?,
            parse_number(pos.get("positionRateDetail"))?,
        ))
    })();

    match numbers {
        Ok((cost_price, current_price, profit_rate, position_rate)) => Some(Position {
            stock_code: field_str(pos, "__code").unwrap_or_default(),
            stock_name: field_str(pos, "__name").unwrap_or_default(),
            cost_price,
            current_price,
            profit_rate,
            position_rate,
        }),
        Err(e) => {
            warn!("{}: skipping position: {}", portfolio_id, e);
            None
        }
    }
}
