pub mod cleaner;
pub mod http_client;
pub mod parsers;
#[cfg(test)]
pub mod testing;

use crate::models::RankCategory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use self::http_client::HttpClient;

/// Upstream pages never hold more than this many rank entries.
pub const PAGE_SIZE: usize = 20;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why one upstream call produced no data. Every variant is retryable; once
/// retries run out callers treat it as absence of data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error {0}")]
    HttpStatus(u16),

    #[error("upstream status {status}: {message}")]
    Upstream { status: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("permit pool closed")]
    PoolClosed,
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable transport for the JSON envelope API.
///
/// Implementations return the full envelope only when it carries the success
/// status; anything else is a [`FetchError`].
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// URL builder for the three upstream endpoints consumed here.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL {:?}", base_url))?;
        Ok(Self { base })
    }

    /// One page of a ranked list. `page` is the 0-based page index.
    pub fn rank_page(&self, category: RankCategory, page: usize, count: usize) -> String {
        self.with_query(&[
            ("type", "rt_get_rank"),
            ("rankType", category.code()),
            ("recIdx", &page.to_string()),
            ("recCnt", &count.to_string()),
            ("rankid", "0"),
        ])
    }

    /// Most recent holding-change records for a portfolio.
    pub fn holding_changes(&self, portfolio_id: &str, count: u32) -> String {
        self.with_query(&[
            ("type", "rt_hold_change72"),
            ("zh", portfolio_id),
            ("recIdx", "1"),
            ("recCnt", &count.to_string()),
        ])
    }

    pub fn portfolio_detail(&self, portfolio_id: &str) -> String {
        self.with_query(&[("type", "rt_zhuhe_detail72"), ("zh", portfolio_id)])
    }

    fn with_query(&self, pairs: &[(&str, &str)]) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut().extend_pairs(pairs);
        url.into()
    }
}
