use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};

const BLOB_SUFFIX: &str = "_data.json";

/// Per-day directory of raw chain payloads: `<root>/<YYYYMMDD>/<SYMBOL>_<YYYYMMDD>_data.json`.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub symbol: String,
    pub data_date: NaiveDate,
    pub raw: Value,
}

impl SnapshotCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `None` when `SNAPSHOT_CACHE_DIR` is unset.
    pub fn from_env() -> Option<Self> {
        std::env::var("SNAPSHOT_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format("%Y%m%d").to_string())
    }

    fn blob_name(symbol: &str, date: NaiveDate) -> String {
        format!("{symbol}_{}{BLOB_SUFFIX}", date.format("%Y%m%d"))
    }

    pub async fn contains(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        let dir = self.day_dir(date);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to list {}", dir.display()))
            }
        };

        let prefix = format!("{symbol}_");
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?
        {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn put(&self, symbol: &str, date: NaiveDate, raw: &Value) -> Result<PathBuf> {
        let dir = self.day_dir(date);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(Self::blob_name(symbol, date));
        let bytes = serde_json::to_vec(raw).context("failed to serialize chain payload")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Every blob of one day, ordered by file name. The data date comes from the file name.
    pub async fn load_day(&self, date: NaiveDate) -> Result<Vec<CachedSnapshot>> {
        let dir = self.day_dir(date);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(BLOB_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let Some((symbol, blob_date)) = parse_blob_name(&name) else {
                tracing::warn!(file = %name, "unrecognized cache file name; skipping");
                continue;
            };

            let path = dir.join(&name);
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let raw = match serde_json::from_slice::<Value>(&bytes) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(file = %name, error = %err, "corrupt cache blob; skipping");
                    continue;
                }
            };

            out.push(CachedSnapshot {
                symbol,
                data_date: blob_date,
                raw,
            });
        }
        Ok(out)
    }
}

fn parse_blob_name(name: &str) -> Option<(String, NaiveDate)> {
    let stem = name.strip_suffix(BLOB_SUFFIX)?;
    let (symbol, ymd) = stem.rsplit_once('_')?;
    let date = NaiveDate::parse_from_str(ymd, "%Y%m%d").ok()?;
    if symbol.is_empty() {
        return None;
    }
    Some((symbol.to_string(), date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 2, 14).unwrap()
    }

    #[tokio::test]
    async fn put_then_contains_by_symbol_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(tmp.path());

        assert!(!cache.contains("AAPL", day()).await.unwrap());
        let path = cache.put("AAPL", day(), &json!({"status": "SUCCESS"})).await.unwrap();
        assert!(path.ends_with("20200214/AAPL_20200214_data.json"));

        assert!(cache.contains("AAPL", day()).await.unwrap());
        assert!(!cache.contains("A", day()).await.unwrap());
        assert!(!cache.contains("AAPL", day().succ_opt().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn load_day_reads_blobs_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(tmp.path());
        cache.put("MSFT", day(), &json!({"symbol": "MSFT"})).await.unwrap();
        cache.put("BRK.B", day(), &json!({"symbol": "BRK.B"})).await.unwrap();
        tokio::fs::write(cache.day_dir(day()).join("notes.txt"), b"x").await.unwrap();
        tokio::fs::write(cache.day_dir(day()).join("BAD_20200214_data.json"), b"{oops").await.unwrap();

        let blobs = cache.load_day(day()).await.unwrap();
        let symbols: Vec<&str> = blobs.iter().map(|b| b.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BRK.B", "MSFT"]);
        assert!(blobs.iter().all(|b| b.data_date == day()));
        assert_eq!(blobs[1].raw, json!({"symbol": "MSFT"}));
    }

    #[test]
    fn parses_blob_names() {
        assert_eq!(
            parse_blob_name("SPY_20200214_data.json"),
            Some(("SPY".to_string(), day()))
        );
        assert_eq!(parse_blob_name("SPY_2020_data.json"), None);
        assert_eq!(parse_blob_name("SPY_20200214.pkl"), None);
    }
}
