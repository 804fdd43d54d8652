use super::{CacheTable, Repository};
use crate::models::{PortfolioDetail, Snapshot};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LATEST_KEY: &str = "latest_rank_data";
pub const DATED_PREFIX: &str = "rank_data_";
const PORTFOLIO_PREFIX: &str = "portfolio_";

// ── Snapshot store ────────────────────────────────────────────────────────────

/// Persists rank snapshots: one entry per day plus the current one.
///
/// At most one snapshot per day key; a newer save for the same day replaces
/// it. `latest_rank_data` is never swept.
#[derive(Clone)]
pub struct SnapshotStore {
    repo: Arc<Repository>,
    expire_window: Duration,
}

impl SnapshotStore {
    pub fn new(repo: Arc<Repository>, expire_window_secs: u64) -> Self {
        Self {
            repo,
            expire_window: secs(expire_window_secs),
        }
    }

    pub fn dated_key(date: NaiveDate) -> String {
        format!("{}{}", DATED_PREFIX, date.format("%Y%m%d"))
    }

    /// Write the dated entry and overwrite `latest`, then sweep old dated entries.
    pub fn save(&self, snapshot: &Snapshot, now: NaiveDateTime) -> Result<String> {
        let key = Self::dated_key(snapshot.date);
        let value = serde_json::to_string(snapshot).context("serialize snapshot")?;

        self.repo
            .replace_all(CacheTable::Rank, &[(key.as_str(), value.as_str()), (LATEST_KEY, value.as_str())], now, None)
            .with_context(|| format!("save snapshot {}", key))?;
        info!("💾 Snapshot cached: {}, {} records", key, snapshot.total_records);

        if let Err(e) = self.sweep(now) {
            warn!("Snapshot sweep failed: {:#}", e);
        }
        Ok(key)
    }

    /// Current snapshot, if one was ever saved. An unreadable value is absent.
    pub fn load_latest(&self) -> Result<Option<Snapshot>> {
        self.load(LATEST_KEY)
    }

    pub fn load_dated(&self, date: NaiveDate) -> Result<Option<Snapshot>> {
        self.load(&Self::dated_key(date))
    }

    fn load(&self, key: &str) -> Result<Option<Snapshot>> {
        let Some(raw) = self.repo.get(CacheTable::Rank, key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Delete dated entries older than the expiry window. An entry's age runs
    /// from the later of its key time and its last write, so a day key saved
    /// this morning is not already stale. Keys that do not parse are left alone.
    pub fn sweep(&self, now: NaiveDateTime) -> Result<usize> {
        let threshold = now
            .checked_sub_signed(self.expire_window)
            .unwrap_or(NaiveDateTime::MIN);
        let mut removed = 0usize;

        for (key, written) in self.repo.keys_with_prefix(CacheTable::Rank, DATED_PREFIX)? {
            let Some(stamp) = key_time(&key) else {
                debug!("Skipping cache key with unparsable time: {}", key);
                continue;
            };
            if stamp.max(written) < threshold && self.repo.delete(CacheTable::Rank, &key)? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("🧹 Removed {} expired snapshot(s)", removed);
        }
        Ok(removed)
    }
}

fn secs(n: u64) -> Duration {
    i64::try_from(n)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Time encoded in a dated key: `YYYYMMDD` (midnight) or `YYYYMMDD_HHMMSS`.
fn key_time(key: &str) -> Option<NaiveDateTime> {
    let suffix = key.strip_prefix(DATED_PREFIX)?;
    match suffix.len() {
        8 => NaiveDate::parse_from_str(suffix, "%Y%m%d").ok()?.and_hms_opt(0, 0, 0),
        15 => NaiveDateTime::parse_from_str(suffix, "%Y%m%d_%H%M%S").ok(),
        _ => None,
    }
}

// ── Portfolio detail cache ────────────────────────────────────────────────────

/// Short-lived cache of single-portfolio detail, filled on first request.
#[derive(Clone)]
pub struct PortfolioCache {
    repo: Arc<Repository>,
    ttl: Duration,
}

impl PortfolioCache {
    pub fn new(repo: Arc<Repository>, ttl_secs: u64) -> Self {
        Self {
            repo,
            ttl: secs(ttl_secs),
        }
    }

    fn key(portfolio_id: &str) -> String {
        format!("{}{}", PORTFOLIO_PREFIX, portfolio_id)
    }

    pub fn get(&self, portfolio_id: &str, now: NaiveDateTime) -> Result<Option<PortfolioDetail>> {
        let key = Self::key(portfolio_id);
        let Some(raw) = self.repo.get_live(CacheTable::Portfolio, &key, now)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(detail) => Ok(Some(detail)),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn put(&self, detail: &PortfolioDetail, now: NaiveDateTime) -> Result<()> {
        let key = Self::key(&detail.portfolio_id);
        let value = serde_json::to_string(detail).context("serialize portfolio detail")?;
        self.repo
            .put(CacheTable::Portfolio, &key, &value, now, now.checked_add_signed(self.ttl))
    }

    pub fn sweep(&self, now: NaiveDateTime) -> Result<usize> {
        self.repo.delete_expired(CacheTable::Portfolio, now)
    }
}
