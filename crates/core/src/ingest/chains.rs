use crate::config::{env_or, Settings};
use crate::ingest::types::ChainSnapshot;
use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_BUDGET: u32 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 32;
const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_STRIKE_COUNT: u32 = 512;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 120;

/// Terminal broker status: the symbol is unknown in this spelling.
pub const FAILED_STATUS: &str = "FAILED";

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// What to do with a payload that carries neither `status` nor `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguousPolicy {
    /// Log it and spend one unit of the retry budget.
    #[default]
    ConsumeAttempt,
    /// Treat it as a permanent failure for this call.
    Fail,
}

impl FromStr for AmbiguousPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consume" | "retry" => Ok(Self::ConsumeAttempt),
            "fail" => Ok(Self::Fail),
            other => anyhow::bail!("unknown ambiguous response policy: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub retry_budget: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub strike_count: u32,
    pub ambiguous_policy: AmbiguousPolicy,
    pub requests_per_minute: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            strike_count: DEFAULT_STRIKE_COUNT,
            ambiguous_policy: AmbiguousPolicy::default(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        let ambiguous_policy = std::env::var("CHAIN_AMBIGUOUS_POLICY")
            .ok()
            .and_then(|s| s.parse::<AmbiguousPolicy>().ok())
            .unwrap_or_default();

        Self {
            retry_budget: env_or("CHAIN_RETRY_BUDGET", DEFAULT_RETRY_BUDGET),
            timeout: Duration::from_secs(env_or("CHAIN_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            retry_delay: Duration::from_millis(env_or(
                "CHAIN_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )),
            strike_count: env_or("CHAIN_STRIKE_COUNT", DEFAULT_STRIKE_COUNT),
            ambiguous_policy,
            requests_per_minute: env_or("BROKER_REQUESTS_PER_MINUTE", DEFAULT_REQUESTS_PER_MINUTE),
        }
    }
}

/// Per-attempt failures. All of them are retried inside the fetch call.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed chain response: {0}")]
    MalformedResponse(String),

    #[error("broker error: {0}")]
    BrokerError(String),

    #[error("response has neither status nor error")]
    AmbiguousResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Broker answered with a terminal status (`FAILED`).
    BrokerStatus(String),
    /// Ambiguous payload under [`AmbiguousPolicy::Fail`].
    AmbiguousResponse,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Snapshot {
        snapshot: ChainSnapshot,
        raw: Value,
        attempts: u32,
    },
    PermanentFailure {
        reason: FailureReason,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        errors: Vec<FetchError>,
    },
    Cancelled {
        attempts: u32,
    },
}

impl FetchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Snapshot { attempts, .. }
            | FetchOutcome::PermanentFailure { attempts, .. }
            | FetchOutcome::Exhausted { attempts, .. }
            | FetchOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    async fn fetch_chain(&self, symbol: &str, shutdown: &Shutdown) -> FetchOutcome;
}

enum Classified {
    Snapshot(ChainSnapshot, Value),
    Failed(String),
}

pub struct ChainFetcher {
    http: reqwest::Client,
    url: String,
    api_key: String,
    config: FetcherConfig,
    limiter: Arc<DirectLimiter>,
}

impl ChainFetcher {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, config: FetcherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build broker http client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
            config,
            limiter,
        })
    }

    pub fn from_settings(settings: &Settings, config: FetcherConfig) -> Result<Self> {
        let api_key = settings.require_broker_api_key()?.to_string();
        Self::new(settings.broker_chains_url.clone(), api_key, config)
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    async fn fetch_once(&self, symbol: &str) -> Result<Classified, FetchError> {
        self.limiter.until_ready().await;

        let strike_count = self.config.strike_count.to_string();
        let res = self
            .http
            .get(&self.url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("symbol", symbol),
                ("strikeCount", strike_count.as_str()),
                ("includeQuotes", "TRUE"),
            ])
            .send()
            .await?;

        let http_status = res.status();
        let text = res.text().await?;
        let raw = serde_json::from_str::<Value>(&text).map_err(|err| {
            FetchError::MalformedResponse(format!("HTTP {http_status}, body is not JSON: {err}"))
        })?;

        classify(raw)
    }
}

/// Sorts a decoded body into snapshot / terminal failure / retryable error.
fn classify(raw: Value) -> Result<Classified, FetchError> {
    let Some(obj) = raw.as_object() else {
        return Err(FetchError::MalformedResponse(
            "top-level JSON value is not an object".to_string(),
        ));
    };

    if let Some(status) = obj.get("status") {
        if status.as_str() == Some(FAILED_STATUS) {
            return Ok(Classified::Failed(FAILED_STATUS.to_string()));
        }
        // A payload with a status is final. If its contract maps do not fit the typed
        // layout, keep the header and the raw payload rather than refetching.
        let snapshot = ChainSnapshot::deserialize(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "chain payload has an unexpected layout; keeping raw payload only");
            ChainSnapshot {
                symbol: obj.get("symbol").and_then(Value::as_str).map(str::to_string),
                status: status.as_str().map(str::to_string),
                ..Default::default()
            }
        });
        return Ok(Classified::Snapshot(snapshot, raw));
    }

    if let Some(err) = obj.get("error") {
        let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Err(FetchError::BrokerError(msg));
    }

    Err(FetchError::AmbiguousResponse)
}

#[async_trait::async_trait]
impl ChainSource for ChainFetcher {
    async fn fetch_chain(&self, symbol: &str, shutdown: &Shutdown) -> FetchOutcome {
        let budget = self.config.retry_budget.max(1);
        let mut errors: Vec<FetchError> = Vec::new();
        let mut attempts: u32 = 0;

        while attempts < budget {
            if shutdown.is_triggered() {
                return FetchOutcome::Cancelled { attempts };
            }
            attempts += 1;

            let err = match self.fetch_once(symbol).await {
                Ok(Classified::Snapshot(snapshot, raw)) => {
                    tracing::debug!(symbol, attempts, "option chain fetched");
                    return FetchOutcome::Snapshot {
                        snapshot,
                        raw,
                        attempts,
                    };
                }
                Ok(Classified::Failed(status)) => {
                    tracing::debug!(symbol, attempts, %status, "broker rejected symbol");
                    return FetchOutcome::PermanentFailure {
                        reason: FailureReason::BrokerStatus(status),
                        attempts,
                    };
                }
                Err(err) => err,
            };

            match &err {
                FetchError::BrokerError(msg) => {
                    tracing::info!(symbol, attempt = attempts, error = %msg, "broker returned an error payload");
                }
                FetchError::AmbiguousResponse => {
                    tracing::warn!(symbol, attempt = attempts, "chain response has no status or error");
                    if self.config.ambiguous_policy == AmbiguousPolicy::Fail {
                        return FetchOutcome::PermanentFailure {
                            reason: FailureReason::AmbiguousResponse,
                            attempts,
                        };
                    }
                }
                _ => {
                    tracing::warn!(symbol, attempt = attempts, error = %err, "failed getting option chain");
                }
            }
            errors.push(err);

            if attempts < budget && !shutdown.sleep(self.config.retry_delay).await {
                return FetchOutcome::Cancelled { attempts };
            }
        }

        tracing::info!(symbol, attempts, "retry budget exhausted");
        FetchOutcome::Exhausted { attempts, errors }
    }
}
