use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub calendar: CalendarConfig,
}

/// Upstream API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Pause after every call, success or not.
    pub request_delay_ms: u64,
    /// Size of the global permit pool shared by every upstream call.
    pub max_concurrency: usize,
    pub user_agent: String,
    pub holdings_record_count: u32,
    pub detail_timeout_secs: u64,
}

/// Rank list aggregation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dedup: bool,
    pub target_count: usize,
}

/// Cache storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub run_migrations: bool,
    /// Dated snapshots older than this are removed by the sweep.
    pub expire_window_secs: u64,
    pub portfolio_ttl_secs: u64,
}

/// Background refresh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub trading_hours_only: bool,
    pub job_timeout_secs: u64,
}

/// Trading calendar configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// `HH:MM` before which same-day holding data is not yet authoritative.
    pub data_cutoff: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://emdcspzhapi.dfcfs.cn/rtV1".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 1000,
            request_delay_ms: 100,
            max_concurrency: 10,
            user_agent: "combo-rank-engine/0.1".to_string(),
            holdings_record_count: 50,
            detail_timeout_secs: 8,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup: true,
            target_count: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/cache/rank_cache.duckdb"),
            run_migrations: true,
            expire_window_secs: 3600,
            portfolio_ttl_secs: 60,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 100,
            trading_hours_only: true,
            job_timeout_secs: 120,
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            data_cutoff: "08:30".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("RANK").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[api]\nmax_concurrency = 5\n\n[pipeline]\ndedup = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.api.max_concurrency, 5);
        assert_eq!(cfg.api.max_retries, 3);
        assert!(!cfg.pipeline.dedup);
        assert_eq!(cfg.pipeline.target_count, 100);
        assert_eq!(cfg.storage.expire_window_secs, 3600);
        assert_eq!(cfg.calendar.data_cutoff, "08:30");
    }
}
