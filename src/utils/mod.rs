use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a unit of work starts and, on drop, how long it took.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// Upstream returns are bare numbers ("12.34"); show them as percentages.
/// Anything else is printed as given, missing values as "—".
pub fn fmt_rate(rate: Option<&str>) -> String {
    match rate.map(str::trim) {
        None | Some("") => "—".to_string(),
        Some(r) if r.ends_with('%') => r.to_string(),
        Some(r) if r.parse::<f64>().is_ok() => format!("{}%", r),
        Some(r) => r.to_string(),
    }
}

/// Cut `s` to at most `max` characters, marking the cut with "…".
pub fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_rate() {
        assert_eq!(fmt_rate(Some("12.34")), "12.34%");
        assert_eq!(fmt_rate(Some("-3")), "-3%");
        assert_eq!(fmt_rate(Some("8.2%")), "8.2%");
        assert_eq!(fmt_rate(Some("n/a")), "n/a");
        assert_eq!(fmt_rate(Some(" ")), "—");
        assert_eq!(fmt_rate(None), "—");
    }

    #[test]
    fn test_clip_counts_chars_not_bytes() {
        assert_eq!(clip("价值成长组合", 10), "价值成长组合");
        assert_eq!(clip("价值成长组合", 4), "价值成…");
        assert_eq!(clip("abc", 3), "abc");
    }
}
