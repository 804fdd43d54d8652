//! Rebalance aggregation: each ranked portfolio's recent holding changes,
//! narrowed to the target trading dates and classified as buy or sell.

pub mod detail;
pub mod summary;

use crate::context::AppContext;
use crate::models::{HoldingChangeRecord, RebalanceEvent, TradeAction};
use crate::pipeline::{CategoryMap, Pipeline};
use crate::upstream::cleaner::{is_sentinel, SENTINEL};
use crate::upstream::parsers::{data_items, parse_holding_record};
use crate::utils::Timer;
use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A record with both fractions filled counts as a buy: the buy side is
/// checked first. Records with neither are not rebalances.
pub fn classify(record: &HoldingChangeRecord) -> Option<(TradeAction, &str)> {
    if !is_sentinel(&record.buy_fraction) {
        return Some((TradeAction::Buy, record.buy_fraction.as_str()));
    }
    if !is_sentinel(&record.sell_fraction) {
        return Some((TradeAction::Sell, record.sell_fraction.as_str()));
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PortfolioKey {
    id: String,
    name: String,
}

#[derive(Clone)]
pub struct Rebalancer {
    ctx: Arc<AppContext>,
    pipeline: Pipeline,
}

impl Rebalancer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&ctx));
        Self { ctx, pipeline }
    }

    pub async fn rebalance_events(&self, days_back: u32, window: u32, use_cache: bool) -> Vec<RebalanceEvent> {
        self.rebalance_events_at(days_back, window, use_cache, Local::now().naive_local())
            .await
    }

    pub async fn rebalance_events_at(
        &self,
        days_back: u32,
        window: u32,
        use_cache: bool,
        now: NaiveDateTime,
    ) -> Vec<RebalanceEvent> {
        let _t = Timer::start("Rebalance scan");

        let portfolios = distinct_portfolios(&self.universe(use_cache).await);
        if portfolios.is_empty() {
            warn!("❌ No portfolios to scan");
            return Vec::new();
        }

        let dates = self.ctx.calendar.target_dates(days_back, window, now);
        info!("Scanning {} portfolios for {:?}", portfolios.len(), dates);

        let mut handles = Vec::new();
        for portfolio in portfolios {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                let records = this.fetch_holdings(&portfolio.id).await;
                (portfolio, records)
            });
            handles.push(handle);
        }

        let mut events = Vec::new();
        let mut scanned = 0usize;
        for handle in handles {
            let (portfolio, records) = match handle.await {
                Ok(r) => r,
                Err(e) => {
                    error!("Holding task panic: {}", e);
                    continue;
                }
            };
            scanned += 1;

            for record in &records {
                let Some(date) = record.date.filter(|d| dates.contains(d)) else {
                    continue;
                };
                let Some((action, fraction)) = classify(record) else {
                    continue;
                };
                let price = match action {
                    TradeAction::Buy => record.buy_price.as_deref(),
                    TradeAction::Sell => record.sell_price.as_deref(),
                };

                events.push(RebalanceEvent {
                    date,
                    portfolio_id: portfolio.id.clone(),
                    portfolio_name: portfolio.name.clone(),
                    stock_code: record.stock_code.clone(),
                    stock_name: record.stock_name.clone(),
                    action,
                    price: price.unwrap_or(SENTINEL).to_string(),
                    fraction: fraction.to_string(),
                });
            }
        }

        info!("📈 Rebalance scan: {} portfolios, {} events", scanned, events.len());
        events
    }

    /// Rank lists whose portfolios are scanned. A fresh fetch falls back to
    /// the read-through snapshot when it comes back empty.
    async fn universe(&self, use_cache: bool) -> CategoryMap {
        if use_cache {
            return self.pipeline.get_or_refresh().await.categories;
        }

        let fresh = self.pipeline.fetch_all_categories().await;
        if fresh.is_empty() {
            warn!("⚠️ Fresh rank fetch returned nothing, falling back to cache");
            return self.pipeline.get_or_refresh().await.categories;
        }
        fresh
    }

    async fn fetch_holdings(&self, portfolio_id: &str) -> Vec<HoldingChangeRecord> {
        let url = self
            .ctx
            .endpoints
            .holding_changes(portfolio_id, self.ctx.config.api.holdings_record_count);

        match self.ctx.fetcher.fetch(&url).await {
            Ok(envelope) => {
                let records: Vec<_> = data_items(&envelope).iter().map(parse_holding_record).collect();
                debug!("{}: {} holding changes", portfolio_id, records.len());
                records
            }
            Err(e) => {
                warn!("{}: holding changes unavailable: {}", portfolio_id, e);
                Vec::new()
            }
        }
    }

    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// Each portfolio once, first occurrence wins. Entries without a name are skipped.
fn distinct_portfolios(lists: &CategoryMap) -> Vec<PortfolioKey> {
    let mut seen = HashSet::new();
    lists
        .values()
        .flatten()
        .filter(|e| !e.name.is_empty())
        .filter(|e| seen.insert(e.portfolio_id.clone()))
        .map(|e| PortfolioKey {
            id: e.portfolio_id.clone(),
            name: e.name.clone(),
        })
        .collect()
}
