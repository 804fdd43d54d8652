use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ── Rank category ─────────────────────────────────────────────────────────────

/// One of the five upstream ranking lists.
///
/// Declaration order is the canonical listing order; `priority()` is the
/// dedup order (lower wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankCategory {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Total,
}

impl RankCategory {
    pub const ALL: [RankCategory; 5] = [
        RankCategory::Daily,
        RankCategory::Weekly,
        RankCategory::Monthly,
        RankCategory::Yearly,
        RankCategory::Total,
    ];

    /// Upstream `rankType` code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Daily => "10005",
            Self::Weekly => "10000",
            Self::Monthly => "10001",
            Self::Yearly => "10003",
            Self::Total => "10004",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Total => "total",
        }
    }

    /// Name the upstream uses for the list.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Daily => "日榜",
            Self::Weekly => "周榜",
            Self::Monthly => "月榜",
            Self::Yearly => "年榜",
            Self::Total => "总榜",
        }
    }

    /// Dedup priority, 1 is highest.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Total => 1,
            Self::Yearly => 2,
            Self::Monthly => 3,
            Self::Weekly => 4,
            Self::Daily => 5,
        }
    }

    #[cfg(test)]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for RankCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Rank entry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankEntry {
    pub portfolio_id: String,
    pub name: String,
    pub rate: Option<String>,       // rateForApp
    pub rate_title: Option<String>, // e.g. "日收益"
    /// 1-based position within its category list.
    pub rank: usize,
    pub category: RankCategory,
    /// Remaining upstream performance fields, kept verbatim.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// One consistent capture of every category that could be fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    pub categories: BTreeMap<RankCategory, Vec<RankEntry>>,
    pub total_records: usize,
}

impl Snapshot {
    pub fn new(timestamp: NaiveDateTime, categories: BTreeMap<RankCategory, Vec<RankEntry>>) -> Self {
        let total_records = categories.values().map(Vec::len).sum();
        Self {
            timestamp,
            date: timestamp.date(),
            categories,
            total_records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Every entry across categories, in category order.
    pub fn entries(&self) -> impl Iterator<Item = &RankEntry> {
        self.categories.values().flatten()
    }
}

// ── Holding changes ───────────────────────────────────────────────────────────

/// One portfolio's change of one stock on one day, as reported upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldingChangeRecord {
    pub date: Option<NaiveDate>,     // tzrq
    pub stock_code: String,          // stkMktCode
    pub stock_name: String,          // stkName
    pub buy_fraction: String,        // cwhj_mr, "-" when absent
    pub sell_fraction: String,       // cwhj_mc, "-" when absent
    pub buy_price: Option<String>,   // cjjg_mr
    pub sell_price: Option<String>,  // cjjg_mc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub portfolio_id: String,
    pub portfolio_name: String,
    pub stock_code: String,
    pub stock_name: String,
    pub action: TradeAction,
    pub price: String,
    pub fraction: String,
}

// ── Stock summary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankBadge {
    pub category: RankCategory,
    pub rank: usize,
}

impl fmt::Display for RankBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.category.display_name(), self.rank)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioRef {
    pub id: String,
    pub name: String,
    pub badges: Vec<RankBadge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockSummary {
    pub stock_code: String,
    pub stock_name: String,
    pub buy_portfolios: Vec<PortfolioRef>,
    pub sell_portfolios: Vec<PortfolioRef>,
}

impl StockSummary {
    pub fn buy_count(&self) -> usize {
        self.buy_portfolios.len()
    }

    pub fn sell_count(&self) -> usize {
        self.sell_portfolios.len()
    }
}

// ── Portfolio detail ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub stock_code: String,
    pub stock_name: String,
    pub cost_price: f64,
    pub current_price: f64,
    pub profit_rate: f64,   // percent
    pub position_rate: f64, // percent of portfolio
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioDetail {
    pub portfolio_id: String,
    pub name: String,
    pub manager: String,
    pub total_return: String,
    pub day_return: String,
    pub positions: Vec<Position>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(id: &str, category: RankCategory, rank: usize) -> RankEntry {
        RankEntry {
            portfolio_id: id.into(),
            name: format!("combo {id}"),
            rate: None,
            rate_title: None,
            rank,
            category,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_snapshot_total_is_sum_of_categories() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let mut cats = BTreeMap::new();
        cats.insert(RankCategory::Daily, vec![entry("1", RankCategory::Daily, 1)]);
        cats.insert(
            RankCategory::Total,
            vec![entry("2", RankCategory::Total, 1), entry("3", RankCategory::Total, 2)],
        );

        let snap = Snapshot::new(ts, cats);
        assert_eq!(snap.total_records, 3);
        assert_eq!(snap.date, ts.date());
        assert_eq!(snap.entries().count(), 3);
    }

    #[test]
    fn test_snapshot_json_uses_category_labels() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let mut cats = BTreeMap::new();
        cats.insert(RankCategory::Weekly, vec![entry("9", RankCategory::Weekly, 1)]);
        let json = serde_json::to_value(Snapshot::new(ts, cats)).unwrap();
        assert!(json["categories"]["weekly"].is_array());
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(RankCategory::from_code("10004"), Some(RankCategory::Total));
        assert_eq!(RankCategory::from_code("99999"), None);
        assert!(RankCategory::Total.priority() < RankCategory::Daily.priority());
    }

    #[test]
    fn test_badge_display() {
        let badge = RankBadge { category: RankCategory::Monthly, rank: 7 };
        assert_eq!(badge.to_string(), "月榜 7");
    }
}
