//! Process-scoped state shared by every component.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::calendar::TradingCalendar;
use crate::config::AppConfig;
use crate::storage::{PortfolioCache, Repository, SnapshotStore};
use crate::upstream::{Endpoints, HttpClient, JsonFetcher};

pub struct AppContext {
    pub config: AppConfig,
    pub endpoints: Endpoints,
    /// Global admission pool; one permit per upstream call.
    pub permits: Arc<Semaphore>,
    pub fetcher: Arc<dyn JsonFetcher>,
    pub repo: Arc<Repository>,
    pub snapshots: SnapshotStore,
    pub portfolios: PortfolioCache,
    pub calendar: TradingCalendar,
}

impl AppContext {
    /// Open the cache database and build the HTTP client from configuration.
    pub fn build(config: AppConfig) -> Result<Arc<Self>> {
        let repo = Arc::new(
            Repository::open(&config.storage.db_path).context("Failed to open cache database")?,
        );
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let permits = Arc::new(Semaphore::new(config.api.max_concurrency.max(1)));
        let fetcher: Arc<dyn JsonFetcher> = Arc::new(
            HttpClient::new(&config.api, Arc::clone(&permits)).context("Failed to build upstream client")?,
        );

        info!(
            "Context ready: db={:?}, concurrency={}, dedup={}",
            config.storage.db_path, config.api.max_concurrency, config.pipeline.dedup
        );
        Self::with_parts(config, permits, fetcher, repo)
    }

    pub fn with_parts(
        config: AppConfig,
        permits: Arc<Semaphore>,
        fetcher: Arc<dyn JsonFetcher>,
        repo: Arc<Repository>,
    ) -> Result<Arc<Self>> {
        let endpoints = Endpoints::new(&config.api.base_url)?;
        let calendar = TradingCalendar::from_config(&config.calendar)?;
        let snapshots = SnapshotStore::new(Arc::clone(&repo), config.storage.expire_window_secs);
        let portfolios = PortfolioCache::new(Arc::clone(&repo), config.storage.portfolio_ttl_secs);

        Ok(Arc::new(Self {
            config,
            endpoints,
            permits,
            fetcher,
            repo,
            snapshots,
            portfolios,
            calendar,
        }))
    }

    /// In-memory cache plus the given fetcher.
    #[cfg(test)]
    pub fn for_tests(config: AppConfig, fetcher: Arc<dyn JsonFetcher>) -> Arc<Self> {
        let repo = Repository::open_in_memory().expect("in-memory duckdb");
        repo.run_migrations().expect("migrations");
        let permits = Arc::new(Semaphore::new(config.api.max_concurrency.max(1)));
        Self::with_parts(config, permits, fetcher, Arc::new(repo)).expect("test context")
    }
}
