//! HTTP client for the combination service.
//!
//! One logical request per cache miss, retried forever on transient
//! failures under the [`RetryPolicy`], with a minimum spacing between
//! consecutive wire requests regardless of outcome. Responses that do not
//! match the wire contract are protocol violations — fatal for the call,
//! never retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::cache::RecipeCache;
use crate::retry::RetryPolicy;
use crate::types::{canonical_pair, Combination, OracleError};

/// Operands longer than this are never sent to the oracle.
const MAX_NAME_LEN: usize = 30;

/// Configuration for the oracle client, loaded from the `[oracle]`
/// section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the combination service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Minimum spacing between consecutive wire requests, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// First retry backoff, in seconds.
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,
    /// Backoff ceiling, in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

fn default_base_url() -> String {
    "https://neal.fun".to_string()
}
fn default_min_interval_ms() -> u64 {
    500
}
fn default_backoff_initial_secs() -> u64 {
    1
}
fn default_backoff_max_secs() -> u64 {
    1024
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            min_interval_ms: default_min_interval_ms(),
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

impl OracleConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(self.backoff_initial_secs),
            max: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

/// Cached, rate-limited combine endpoint.
pub struct OracleClient {
    http: reqwest::Client,
    pair_url: Url,
    referer: String,
    cache: Arc<RecipeCache>,
    retry: RetryPolicy,
    min_interval: Duration,
    /// Instant of the previous wire request, shared across all calls.
    last_request: Mutex<Option<Instant>>,
}

impl OracleClient {
    /// Build a client over an existing recipe cache.
    pub fn new(config: &OracleConfig, cache: Arc<RecipeCache>) -> Result<Self, OracleError> {
        let base = Url::parse(&config.base_url)?;
        let pair_url = base.join("/api/infinite-craft/pair")?;
        let referer = base.join("/infinite-craft/")?.to_string();

        // The service only answers requests that look like its own web
        // client, so the headers carry a browser profile.
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64; rv:123.0) Gecko/20100101 Firefox/123.0",
            ),
        );
        headers.insert("Alt-Used", HeaderValue::from_static("neal.fun"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OracleError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            pair_url,
            referer,
            cache,
            retry: config.retry_policy(),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Combine two items, returning the result name if a combination
    /// exists. Argument order is irrelevant; repeated calls for the same
    /// pair hit the persistent cache and never re-touch the network.
    pub async fn combine(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Option<String>, OracleError> {
        self.combine_inner(first, second, false).await
    }

    /// Combine, bypassing the cached answer (the fresh network response
    /// overwrites the cache).
    pub async fn refresh(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Option<String>, OracleError> {
        self.combine_inner(first, second, true).await
    }

    async fn combine_inner(
        &self,
        first: &str,
        second: &str,
        refresh: bool,
    ) -> Result<Option<String>, OracleError> {
        let (first, second) = canonical_pair(first, second);

        if first.chars().count() > MAX_NAME_LEN || second.chars().count() > MAX_NAME_LEN {
            return Ok(None);
        }

        if !refresh {
            if let Some(stored) = self.cache.pair_result(&first, &second)? {
                tracing::debug!(first, second, result = stored.as_deref().unwrap_or(""), "Pair cache hit");
                return Ok(stored);
            }
        }

        let combo = self.request_pair(&first, &second).await?;
        tracing::debug!(first, second, result = %combo.result, is_new = combo.is_new, "Oracle response");

        let emoji = combo.emoji.clone();
        let is_new = combo.is_new;
        let result = combo.into_result();

        self.cache.store_pair(&first, &second, result.as_deref())?;
        if let Some(name) = &result {
            if self.cache.record_item(name, &emoji, is_new)? {
                tracing::info!(first, second, result = %name, is_new, "New item discovered");
            }
        }

        Ok(result)
    }

    /// One logical wire request: rate-limited, retried forever on
    /// transport and HTTP-status failures, fatal on contract violations.
    async fn request_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Combination, OracleError> {
        let mut retries: u32 = 0;
        loop {
            self.pace().await;

            let sent = self
                .http
                .get(self.pair_url.clone())
                .query(&[("first", first), ("second", second)])
                .header(reqwest::header::REFERER, &self.referer)
                .send()
                .await;

            // Transport errors, HTTP error statuses, and non-JSON bodies
            // are all transient: back off and try again. Only a
            // well-formed HTTP response with a malformed body shape is
            // allowed to fail the call.
            let body = match sent.and_then(|r| r.error_for_status()) {
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(value) => value,
                    Err(e) => {
                        self.backoff(&mut retries, &e.to_string()).await;
                        continue;
                    }
                },
                Err(e) => {
                    self.backoff(&mut retries, &e.to_string()).await;
                    continue;
                }
            };

            return parse_combination(&body);
        }
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn backoff(&self, retries: &mut u32, error: &str) {
        let delay = self.retry.delay(*retries);
        *retries += 1;
        tracing::warn!(
            error,
            retry = *retries,
            delay_s = delay.as_secs_f64(),
            "Oracle request failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Validate the wire shape `{result: string, emoji: string, isNew: bool}`.
///
/// A missing `emoji` defaults to `""`; anything else out of shape is a
/// protocol violation.
fn parse_combination(body: &serde_json::Value) -> Result<Combination, OracleError> {
    let obj = body
        .as_object()
        .ok_or_else(|| OracleError::Protocol(format!("expected object, got: {body}")))?;

    let result = obj
        .get("result")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OracleError::Protocol("`result` missing or not a string".to_string()))?
        .to_string();

    let emoji = match obj.get("emoji") {
        None => String::new(),
        Some(v) => v
            .as_str()
            .ok_or_else(|| OracleError::Protocol("`emoji` is not a string".to_string()))?
            .to_string(),
    };

    let is_new = obj
        .get("isNew")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| OracleError::Protocol("`isNew` missing or not a boolean".to_string()))?;

    Ok(Combination {
        result,
        emoji,
        is_new,
    })
}
