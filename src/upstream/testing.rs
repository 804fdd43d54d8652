//! Scripted in-memory upstream used by unit tests across the crate.

use super::{FetchError, JsonFetcher, PAGE_SIZE};
use crate::models::RankCategory;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

pub fn rank_item(id: &str, name: &str) -> Value {
    json!({"zjzh": id, "zhuheName": name, "rateForApp": "10.0", "rateTitle": "收益"})
}

pub fn holding_item(date: &str, code: &str, name: &str, buy: &str, sell: &str) -> Value {
    json!({
        "tzrq": date, "stkMktCode": code, "stkName": name,
        "cwhj_mr": buy, "cwhj_mc": sell, "cjjg_mr": "10.00", "cjjg_mc": "11.00"
    })
}

#[derive(Default)]
pub struct ScriptedFetcher {
    ranks: HashMap<RankCategory, Vec<Value>>,
    holdings: HashMap<String, Vec<Value>>,
    details: HashMap<String, Value>,
    failing: HashSet<RankCategory>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` generated entries with ids `<prefix>0..`.
    pub fn with_generated(self, category: RankCategory, prefix: &str, count: usize) -> Self {
        let items = (0..count)
            .map(|i| rank_item(&format!("{prefix}{i}"), &format!("{prefix} combo {i}")))
            .collect();
        self.with_ranks(category, items)
    }

    pub fn with_ranks(mut self, category: RankCategory, items: Vec<Value>) -> Self {
        self.ranks.insert(category, items);
        self
    }

    pub fn with_holdings(mut self, portfolio_id: &str, items: Vec<Value>) -> Self {
        self.holdings.insert(portfolio_id.to_string(), items);
        self
    }

    pub fn with_detail(mut self, portfolio_id: &str, data: Value) -> Self {
        self.details.insert(portfolio_id.to_string(), data);
        self
    }

    pub fn failing(mut self, category: RankCategory) -> Self {
        self.failing.insert(category);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_of(&self, kind: &str) -> usize {
        let needle = format!("type={kind}");
        self.urls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.contains(&needle))
            .count()
    }

    fn upstream_error() -> FetchError {
        FetchError::Upstream { status: "-1".into(), message: "scripted failure".into() }
    }
}

#[async_trait]
impl JsonFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let parsed = Url::parse(url).map_err(|e| FetchError::Malformed(e.to_string()))?;
        let q: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let param = |k: &str| q.get(k).cloned().unwrap_or_default();

        match param("type").as_str() {
            "rt_get_rank" => {
                let category = RankCategory::from_code(&param("rankType"))
                    .ok_or_else(|| FetchError::Malformed("unknown rankType".into()))?;
                if self.failing.contains(&category) {
                    return Err(Self::upstream_error());
                }
                let items = self.ranks.get(&category).cloned().unwrap_or_default();
                let page: usize = param("recIdx").parse().unwrap_or(0);
                let count: usize = param("recCnt").parse().unwrap_or(PAGE_SIZE);
                let start = (page * PAGE_SIZE).min(items.len());
                let end = (start + count.min(PAGE_SIZE)).min(items.len());
                Ok(json!({"result": "0", "data": items[start..end].to_vec()}))
            }
            "rt_hold_change72" => match self.holdings.get(&param("zh")) {
                Some(items) => Ok(json!({"result": "0", "data": items})),
                None => Err(Self::upstream_error()),
            },
            "rt_zhuhe_detail72" => match self.details.get(&param("zh")) {
                Some(data) => Ok(json!({"result": "0", "data": data})),
                None => Err(Self::upstream_error()),
            },
            other => Err(FetchError::Malformed(format!("unexpected type {other}"))),
        }
    }
}
