pub mod domain;
pub mod ingest;
pub mod orchestrator;
pub mod shutdown;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_CHAINS_URL: &str = "https://api.tdameritrade.com/v1/marketdata/chains";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub broker_api_key: Option<String>,
        pub broker_chains_url: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                broker_api_key: std::env::var("BROKER_API_KEY").ok(),
                broker_chains_url: std::env::var("BROKER_CHAINS_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CHAINS_URL.to_string()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_broker_api_key(&self) -> anyhow::Result<&str> {
            self.broker_api_key
                .as_deref()
                .context("BROKER_API_KEY is required")
        }
    }

    /// Reads a parseable env var, falling back to `default` when unset or malformed.
    pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }
}
