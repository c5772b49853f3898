use crate::config::env_or;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_UNIVERSE_URL: &str =
    "http://markets.cboe.com/us/options/symboldir/equity_index_options/?download=csv";

/// A listing with fewer symbols than this is treated as a broken feed.
pub const DEFAULT_MIN_SYMBOLS: usize = 9000;

#[derive(Debug, Clone)]
pub struct UniverseOptions {
    pub url: String,
    pub min_symbols: usize,
    pub timeout: Duration,
}

impl Default for UniverseOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_UNIVERSE_URL.to_string(),
            min_symbols: DEFAULT_MIN_SYMBOLS,
            timeout: Duration::from_secs(60),
        }
    }
}

impl UniverseOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("UNIVERSE_URL") {
            if !s.trim().is_empty() {
                out.url = s;
            }
        }
        out.min_symbols = env_or("UNIVERSE_MIN_SYMBOLS", out.min_symbols);
        out.timeout = Duration::from_secs(env_or("UNIVERSE_TIMEOUT_SECS", 60));

        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    #[error("universe feed returned {got} symbols, expected at least {min}; the feed looks broken")]
    Integrity { got: usize, min: usize },
}

#[async_trait::async_trait]
pub trait UniverseSource: Send + Sync {
    /// Sorted, de-duplicated symbols.
    async fn fetch_symbols(&self) -> Result<Vec<String>>;
}

pub fn check_universe(symbols: &[String], min_symbols: usize) -> Result<(), UniverseError> {
    if symbols.len() < min_symbols {
        return Err(UniverseError::Integrity {
            got: symbols.len(),
            min: min_symbols,
        });
    }
    Ok(())
}

/// Fetches the universe and applies the minimum-count sanity check.
pub async fn load_universe(source: &dyn UniverseSource, min_symbols: usize) -> Result<Vec<String>> {
    let symbols = source.fetch_symbols().await?;
    tracing::info!(count = symbols.len(), "got symbols from universe feed");
    check_universe(&symbols, min_symbols)?;
    Ok(symbols)
}

/// CBOE equity/index options symbol directory.
pub struct CboeUniverse {
    http: reqwest::Client,
    url: String,
}

impl CboeUniverse {
    pub fn new(opts: &UniverseOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .build()
            .context("failed to build universe http client")?;
        Ok(Self {
            http,
            url: opts.url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl UniverseSource for CboeUniverse {
    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let res = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("universe feed request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read universe feed body")?;
        if !status.is_success() {
            anyhow::bail!("universe feed HTTP {status}");
        }

        Ok(parse_symbol_directory(&text))
    }
}

/// Takes the second column of every row. Rows without one are logged and skipped;
/// entries with `#` (non-standard series) or whitespace (header) are dropped.
pub fn parse_symbol_directory(text: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut out = BTreeSet::new();
    for (idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                tracing::info!(row = idx, error = %err, "row is not parsable");
                continue;
            }
        };

        let Some(candidate) = record.get(1).map(str::trim) else {
            tracing::info!(row = idx, "row is not parsable: missing symbol column");
            continue;
        };

        if candidate.is_empty() || candidate.contains('#') || candidate.contains(char::is_whitespace) {
            continue;
        }
        out.insert(candidate.to_string());
    }

    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DIRECTORY: &str = "\"Company Name\",\"Stock Symbol\",\"DPM Name\",\"Post/Station\"\n\
\"Agilent Technologies\",\"A\",\"Susquehanna\",\"12/2\"\n\
\"Apple Inc.\",\"AAPL\",\"Citadel\",\"5/1\"\n\
\"Apple Inc. adjusted\",\"AAPL1#\",\"Citadel\",\"5/1\"\n\
garbage line without columns\n\
\"Apple Inc.\",\"AAPL\",\"Citadel\",\"5/1\"\n\
\"Berkshire Hathaway\",\"BRK.B\",\"Susquehanna\",\"3/4\"\n";

    #[test]
    fn parses_directory_rows() {
        assert_eq!(parse_symbol_directory(DIRECTORY), vec!["A", "AAPL", "BRK.B"]);
    }

    #[test]
    fn sanity_check_rejects_short_universe() {
        let symbols: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();
        let err = check_universe(&symbols, 9000).unwrap_err();
        assert!(matches!(err, UniverseError::Integrity { got: 10, min: 9000 }));
        assert!(check_universe(&symbols, 10).is_ok());
    }

    #[tokio::test]
    async fn fetches_and_checks_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DIRECTORY))
            .mount(&server)
            .await;

        let opts = UniverseOptions {
            url: server.uri(),
            min_symbols: 3,
            ..Default::default()
        };
        let source = CboeUniverse::new(&opts).unwrap();
        let symbols = load_universe(&source, opts.min_symbols).await.unwrap();
        assert_eq!(symbols, vec!["A", "AAPL", "BRK.B"]);

        let err = load_universe(&source, 9000).await.unwrap_err();
        assert!(err.downcast_ref::<UniverseError>().is_some());
    }
}
