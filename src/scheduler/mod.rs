//! Periodic refresh loop.
//!
//! One refresh runs immediately on start; after that a fixed interval drives
//! refreshes, gated to exchange sessions (09:15-11:30 and 13:00-15:00, Mon-Fri)
//! unless the gate is disabled. A refresh that overruns the job timeout is left
//! running and still lands in the cache.

use anyhow::{bail, Result};
use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Weekday};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::pipeline::Pipeline;

const SESSIONS: [((u32, u32), (u32, u32)); 2] = [((9, 15), (11, 30)), ((13, 0), (15, 0))];

/// Weekday inside a morning or afternoon session, bounds inclusive.
pub fn is_trading_time(now: NaiveDateTime) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = now.time();
    SESSIONS.iter().any(|&((sh, sm), (eh, em))| {
        match (NaiveTime::from_hms_opt(sh, sm, 0), NaiveTime::from_hms_opt(eh, em, 0)) {
            (Some(start), Some(end)) => start <= t && t <= end,
            _ => false,
        }
    })
}

pub struct Scheduler {
    ctx: Arc<AppContext>,
    pipeline: Pipeline,
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&ctx));
        Self { ctx, pipeline }
    }

    /// Run until `shutdown` flips to true. Fails only when the first refresh
    /// produced nothing.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("🚀 Initial refresh");
        if !self.pipeline.run_update().await {
            bail!("Initial refresh produced no data");
        }

        let cfg = &self.ctx.config.scheduler;
        let period = cfg.refresh_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started: every {:?}, trading hours only = {}",
            period, cfg.trading_hours_only
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(Local::now().naive_local()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    async fn tick(&self, now: NaiveDateTime) {
        match self.ctx.portfolios.sweep(now) {
            Ok(0) => {}
            Ok(n) => debug!("🧹 {} expired portfolio entries removed", n),
            Err(e) => warn!("Portfolio cache sweep failed: {:#}", e),
        }

        if self.ctx.config.scheduler.trading_hours_only && !is_trading_time(now) {
            info!("Outside trading hours, skipping refresh");
            return;
        }

        debug!("{} upstream permits free", self.ctx.permits.available_permits());
        let pipeline = self.pipeline.clone();
        let job = tokio::spawn(async move { pipeline.run_update().await });
        let limit = self.ctx.config.scheduler.job_timeout();

        match tokio::time::timeout(limit, job).await {
            Ok(Ok(true)) => info!("Scheduled refresh succeeded"),
            Ok(Ok(false)) => warn!("Scheduled refresh produced no data"),
            Ok(Err(e)) => error!("Scheduled refresh panicked: {}", e),
            Err(_) => warn!("Scheduled refresh still running after {:?}, leaving it in the background", limit),
        }
    }
}
