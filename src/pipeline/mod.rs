//! Pipeline orchestrator: upstream rank lists → dedup → snapshot store.
//!
//! ## Stages
//!
//! `fetch_category()` walks one ranked list page by page (20 per page) until
//!   the target count, a short page, or a failed page. Partial lists are kept.
//!
//! `fetch_all_categories()` runs the five lists concurrently. Every page call
//!   goes through the shared permit pool, so no extra pool is needed here.
//!   Lists that come back empty are simply left out.
//!
//! `refresh()` = fetch all + optional dedup + save. Only a completely empty
//!   aggregation counts as failure.
//!
//! `get_or_refresh()` is the read-through entry point used by request paths.

pub mod dedup;

use crate::context::AppContext;
use crate::models::{RankCategory, RankEntry, Snapshot};
use crate::upstream::parsers::{data_items, parse_rank_entry};
use crate::upstream::PAGE_SIZE;
use crate::utils::Timer;
use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use self::dedup::dedupe;

pub type CategoryMap = BTreeMap<RankCategory, Vec<RankEntry>>;

#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<AppContext>,
}

impl Pipeline {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    // ── Page assembler ────────────────────────────────────────────────────────

    /// One category's ranked list, ranks 1..N in arrival order.
    pub async fn fetch_category(&self, category: RankCategory) -> Vec<RankEntry> {
        let target = self.ctx.config.pipeline.target_count;
        let mut items = Vec::new();
        let mut page = 0usize;

        while items.len() < target {
            let count = PAGE_SIZE.min(target - items.len());
            let url = self.ctx.endpoints.rank_page(category, page, count);

            let envelope = match self.ctx.fetcher.fetch(&url).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("{}: page {} failed, keeping {} entries: {}", category, page, items.len(), e);
                    break;
                }
            };

            let data = data_items(&envelope);
            if data.is_empty() {
                debug!("{}: empty page {} — stopping pagination", category, page);
                break;
            }
            items.extend(data.iter().cloned());
            page += 1;

            if data.len() < count {
                debug!("{}: short page {} ({} < {}) — end of list", category, page - 1, data.len(), count);
                break;
            }
        }

        items.truncate(target);

        let entries: Vec<RankEntry> = items
            .iter()
            .filter_map(|item| parse_rank_entry(item, category, 0))
            .enumerate()
            .map(|(i, mut e)| {
                e.rank = i + 1;
                e
            })
            .collect();

        info!("{} ({}): {} entries", category, category.display_name(), entries.len());
        entries
    }

    // ── Multi-list aggregator ─────────────────────────────────────────────────

    pub async fn fetch_all_categories(&self) -> CategoryMap {
        let mut handles = Vec::new();

        for category in RankCategory::ALL {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.fetch_category(category).await });
            handles.push((category, handle));
        }

        let mut results = CategoryMap::new();
        for (category, handle) in handles {
            match handle.await {
                Ok(entries) if !entries.is_empty() => {
                    results.insert(category, entries);
                }
                Ok(_) => warn!("{}: no data", category),
                Err(e) => error!("Task panic for {}: {}", category, e),
            }
        }
        results
    }

    // ── Refresh ───────────────────────────────────────────────────────────────

    /// Fetch, dedup and save one snapshot. `Ok(None)` when nothing came back.
    pub async fn refresh_at(&self, now: NaiveDateTime) -> Result<Option<Snapshot>> {
        let _t = Timer::start("Rank refresh");

        let fetched = self.fetch_all_categories().await;
        if fetched.is_empty() {
            return Ok(None);
        }
        let fetched_total: usize = fetched.values().map(Vec::len).sum();

        let categories = if self.ctx.config.pipeline.dedup {
            dedupe(fetched)
        } else {
            fetched
        };

        let snapshot = Snapshot::new(now, categories);
        self.ctx.snapshots.save(&snapshot, now)?;

        info!(
            "🌐 Refresh done: {} lists, {} fetched, {} kept",
            snapshot.categories.len(),
            fetched_total,
            snapshot.total_records
        );
        Ok(Some(snapshot))
    }

    pub async fn refresh(&self) -> Result<Option<Snapshot>> {
        self.refresh_at(Local::now().naive_local()).await
    }

    /// One refresh cycle for the scheduler: true when a snapshot was saved.
    pub async fn run_update(&self) -> bool {
        match self.refresh().await {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!("No rank list returned any data");
                false
            }
            Err(e) => {
                error!("Refresh failed: {:#}", e);
                false
            }
        }
    }

    // ── Read-through ──────────────────────────────────────────────────────────

    /// Latest non-empty snapshot, refreshing synchronously on a miss.
    /// An empty snapshot stands in for a failed refresh.
    pub async fn get_or_refresh(&self) -> Snapshot {
        let now = Local::now().naive_local();

        match self.ctx.snapshots.load_latest() {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                debug!("📋 Using cached snapshot ({} records)", snapshot.total_records);
                return snapshot;
            }
            Ok(_) => info!("🔄 No usable cached snapshot, refreshing"),
            Err(e) => warn!("Cache read failed, refreshing: {:#}", e),
        }

        match self.refresh_at(now).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!("❌ Refresh returned no data");
                Snapshot::new(now, CategoryMap::new())
            }
            Err(e) => {
                error!("❌ Refresh failed: {:#}", e);
                Snapshot::new(now, CategoryMap::new())
            }
        }
    }
}
