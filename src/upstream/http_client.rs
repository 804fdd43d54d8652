use super::parsers::parse_envelope;
use super::{FetchError, JsonFetcher};
use crate::config::ApiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, warn};

/// Rate-limited upstream client.
///
/// Every call holds one permit from the shared pool for its whole retry loop,
/// then sleeps the inter-request delay after giving the permit back.
pub struct HttpClient {
    inner: reqwest::Client,
    permits: Arc<Semaphore>,
    config: ApiConfig,
}

impl HttpClient {
    pub fn new(config: &ApiConfig, permits: Arc<Semaphore>) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            permits,
            config: config.clone(),
        })
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Result<Value, FetchError> {
        debug!("GET {} (attempt {})", url, attempt);

        let result = async {
            let resp = self.inner.get(url).send().await?;
            let status = resp.status();
            if status != StatusCode::OK {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            let body = resp.text().await?;
            parse_envelope(&body)
        }
        .await;

        if let Err(e) = &result {
            warn!(
                "Request failed (attempt {}/{}): {}",
                attempt, self.config.max_retries, e
            );
        }
        result
    }
}

#[async_trait]
impl JsonFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let result = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| FetchError::PoolClosed)?;

            let retries = self.config.max_retries.saturating_sub(1) as usize;
            let strategy = FixedInterval::new(self.config.retry_backoff()).take(retries);

            let client = self;
            let mut attempt = 0u32;
            Retry::start(strategy, move || {
                attempt += 1;
                let n = attempt;
                async move { client.attempt(url, n).await }
            })
            .await
        };

        sleep(self.config.request_delay()).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local upstream answering the n-th request with `replies[n]` (the last
    /// reply repeats). Returns the base URL and the request counter.
    async fn serve(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (code, body) = replies[n.min(replies.len() - 1)];
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut seen = Vec::new();
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(k) => seen.extend_from_slice(&buf[..k]),
                        }
                    }
                    let resp = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        code,
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        (format!("http://{}/rtV1?type=rt_get_rank", addr), hits)
    }

    fn retrying(max_retries: u32, backoff_ms: u64) -> ApiConfig {
        ApiConfig {
            timeout_secs: 5,
            max_retries,
            retry_backoff_ms: backoff_ms,
            request_delay_ms: 1,
            ..ApiConfig::default()
        }
    }

    #[tokio::test]
    async fn test_error_status_field_retried_while_holding_permit() {
        let (url, hits) = serve(vec![
            (200, r#"{"result":"-1","message":"busy"}"#),
            (200, r#"{"result":"-1","message":"busy"}"#),
            (200, r#"{"result":"0","data":[]}"#),
        ])
        .await;
        let permits = Arc::new(Semaphore::new(1));
        let client = HttpClient::new(&retrying(3, 200), Arc::clone(&permits)).unwrap();

        let call = tokio::spawn(async move { client.fetch(&url).await });

        // first attempt has failed, backoff in progress
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(permits.available_permits(), 0);

        let res = tokio::time::timeout(Duration::from_secs(10), call).await.unwrap().unwrap();
        assert_eq!(res.unwrap()["result"], "0");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_uses_every_attempt() {
        let (url, hits) = serve(vec![(200, "<html>maintenance</html>")]).await;
        let permits = Arc::new(Semaphore::new(1));
        let client = HttpClient::new(&retrying(3, 1), Arc::clone(&permits)).unwrap();

        let res = client.fetch(&url).await;

        assert!(matches!(res, Err(FetchError::Malformed(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_non_200_status_is_retried() {
        let (url, hits) = serve(vec![
            (204, ""),
            (503, "{}"),
            (200, r#"{"result":"0","data":[]}"#),
        ])
        .await;
        let client = HttpClient::new(&retrying(3, 1), Arc::new(Semaphore::new(1))).unwrap();

        assert!(client.fetch(&url).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failing_status_exhausts_retries() {
        let (url, hits) = serve(vec![(500, "{}")]).await;
        let client = HttpClient::new(&retrying(2, 1), Arc::new(Semaphore::new(1))).unwrap();

        let res = client.fetch(&url).await;

        assert!(matches!(res, Err(FetchError::HttpStatus(500))));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            max_retries: 2,
            retry_backoff_ms: 1,
            request_delay_ms: 1,
            ..ApiConfig::default()
        };
        let permits = Arc::new(Semaphore::new(1));
        let client = HttpClient::new(&config, Arc::clone(&permits)).unwrap();

        let res = tokio::time::timeout(
            Duration::from_secs(10),
            client.fetch("http://127.0.0.1:9/rtV1?type=rt_get_rank"),
        )
        .await
        .unwrap();

        assert!(matches!(res, Err(FetchError::Transport(_))));
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_is_a_failure_value() {
        let permits = Arc::new(Semaphore::new(1));
        permits.close();
        let client = HttpClient::new(&ApiConfig::default(), permits).unwrap();

        let res = client.fetch("http://127.0.0.1:9/").await;
        assert!(matches!(res, Err(FetchError::PoolClosed)));
    }
}
