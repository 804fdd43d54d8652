use super::Rebalancer;
use crate::models::PortfolioDetail;
use crate::upstream::cleaner::is_portfolio_id;
use crate::upstream::parsers::parse_portfolio_detail;
use anyhow::{bail, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailLookup {
    pub detail: PortfolioDetail,
    pub from_cache: bool,
}

impl Rebalancer {
    pub async fn portfolio_detail(&self, portfolio_id: &str) -> Result<Option<DetailLookup>> {
        self.portfolio_detail_at(portfolio_id, Local::now().naive_local()).await
    }

    /// Cached detail when still live, otherwise one bounded upstream fetch.
    /// `Ok(None)` on timeout or upstream failure.
    pub async fn portfolio_detail_at(
        &self,
        portfolio_id: &str,
        now: NaiveDateTime,
    ) -> Result<Option<DetailLookup>> {
        if !is_portfolio_id(portfolio_id) {
            bail!("Invalid portfolio id {:?}: digits only", portfolio_id);
        }

        match self.ctx.portfolios.get(portfolio_id, now) {
            Ok(Some(detail)) => {
                debug!("📋 Portfolio {} served from cache", portfolio_id);
                return Ok(Some(DetailLookup { detail, from_cache: true }));
            }
            Ok(None) => {}
            Err(e) => warn!("Portfolio cache read failed for {}: {:#}", portfolio_id, e),
        }

        let url = self.ctx.endpoints.portfolio_detail(portfolio_id);
        let deadline = self.ctx.config.api.detail_timeout();

        let envelope = match tokio::time::timeout(deadline, self.ctx.fetcher.fetch(&url)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!("Portfolio {} unavailable: {}", portfolio_id, e);
                return Ok(None);
            }
            Err(_) => {
                warn!("Portfolio {} timed out after {:?}", portfolio_id, deadline);
                return Ok(None);
            }
        };

        let Some(detail) = parse_portfolio_detail(portfolio_id, &envelope) else {
            warn!("Portfolio {}: response has no detail payload", portfolio_id);
            return Ok(None);
        };

        if let Err(e) = self.ctx.portfolios.put(&detail, now) {
            warn!("Could not cache portfolio {}: {:#}", portfolio_id, e);
        }
        info!("Portfolio {} fetched: {} positions", portfolio_id, detail.positions.len());
        Ok(Some(DetailLookup { detail, from_cache: false }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::context::AppContext;
    use crate::upstream::testing::ScriptedFetcher;
    use chrono::{Duration, NaiveDate};
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn rebalancer() -> (Rebalancer, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new().with_detail(
            "8001",
            json!({
                "detail": {"zuheName": "Alpha", "uidNick": "mgr", "rate": "45.1", "rateDay": "0.8"},
                "position": [{"__code": "600519", "__name": "茅台", "cbj": "1500", "__zxjg": "1620",
                              "webYkRate": "8.0", "positionRateDetail": "20.0"}]
            }),
        ));
        let ctx = AppContext::for_tests(AppConfig::default(), fetcher.clone());
        (Rebalancer::new(ctx), fetcher)
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache_until_ttl() {
        let (r, fetcher) = rebalancer();

        let first = assert_ok!(r.portfolio_detail_at("8001", now()).await).unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.detail.name, "Alpha");
        assert_eq!(first.detail.positions.len(), 1);

        let second = assert_ok!(r.portfolio_detail_at("8001", now() + Duration::seconds(30)).await).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.detail, first.detail);
        assert_eq!(fetcher.calls(), 1);

        let expired = assert_ok!(r.portfolio_detail_at("8001", now() + Duration::seconds(61)).await).unwrap();
        assert!(!expired.from_cache);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_digit_id_rejected_without_network() {
        let (r, fetcher) = rebalancer();
        assert_err!(r.portfolio_detail_at("80x1", now()).await);
        assert_err!(r.portfolio_detail_at("", now()).await);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_portfolio_is_none() {
        let (r, _) = rebalancer();
        assert_eq!(assert_ok!(r.portfolio_detail_at("9999", now()).await), None);
    }
}
