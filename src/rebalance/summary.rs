use super::Rebalancer;
use crate::models::{PortfolioRef, RankBadge, RebalanceEvent, Snapshot, StockSummary, TradeAction};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Rank badges per portfolio id, in category order.
pub fn badge_index(snapshot: &Snapshot) -> HashMap<String, Vec<RankBadge>> {
    let mut index: HashMap<String, Vec<RankBadge>> = HashMap::new();
    for e in snapshot.entries() {
        index.entry(e.portfolio_id.clone()).or_default().push(RankBadge {
            category: e.category,
            rank: e.rank,
        });
    }
    index
}

/// Group events by stock, one buy and one sell mention per portfolio, most
/// bought first. Ties keep first-seen order.
pub fn summarize(events: &[RebalanceEvent], snapshot: &Snapshot) -> Vec<StockSummary> {
    let badges = badge_index(snapshot);
    let mut out: Vec<StockSummary> = Vec::new();
    let mut slot: HashMap<(&str, &str), usize> = HashMap::new();
    let mut mentioned: HashSet<(usize, TradeAction, &str)> = HashSet::new();

    for ev in events {
        let key = (ev.stock_code.as_str(), ev.stock_name.as_str());
        let idx = *slot.entry(key).or_insert_with(|| {
            out.push(StockSummary {
                stock_code: ev.stock_code.clone(),
                stock_name: ev.stock_name.clone(),
                buy_portfolios: Vec::new(),
                sell_portfolios: Vec::new(),
            });
            out.len() - 1
        });

        if !mentioned.insert((idx, ev.action, ev.portfolio_id.as_str())) {
            continue;
        }

        let portfolio = PortfolioRef {
            id: ev.portfolio_id.clone(),
            name: ev.portfolio_name.clone(),
            badges: badges.get(&ev.portfolio_id).cloned().unwrap_or_default(),
        };
        match ev.action {
            TradeAction::Buy => out[idx].buy_portfolios.push(portfolio),
            TradeAction::Sell => out[idx].sell_portfolios.push(portfolio),
        }
    }

    out.sort_by(|a, b| b.buy_count().cmp(&a.buy_count()));
    out
}

impl Rebalancer {
    /// Per-stock view over a fresh rebalance scan, badged from the cached ranks.
    pub async fn stock_summary(&self, days_back: u32, window: u32) -> Vec<StockSummary> {
        let events = self.rebalance_events(days_back, window, false).await;
        let snapshot = self.pipeline().get_or_refresh().await;
        let summary = summarize(&events, &snapshot);
        info!("📊 {} stocks across {} events", summary.len(), events.len());
        summary
    }
}
