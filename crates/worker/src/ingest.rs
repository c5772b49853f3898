use anyhow::Context;
use chrono::NaiveDate;
use optarchive_core::domain::contract::{ContractRecord, SymbolDocument};
use optarchive_core::ingest::cache::SnapshotCache;
use optarchive_core::ingest::normalize::normalize_chain;
use optarchive_core::ingest::types::ChainSnapshot;
use optarchive_core::storage::snapshots::SnapshotStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CSV_FILE_PREFIX: &str = "L2_options_";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CsvImportReport {
    pub files: usize,
    pub rows: usize,
    pub inserted: u64,
}

/// Imports every `L2_options_*` file found in directories under `root` whose name
/// starts with `folder_prefix`. One document per underlying symbol and file.
pub async fn import_csv_folders(
    store: &dyn SnapshotStore,
    root: &Path,
    folder_prefix: &str,
    symbols: Option<&[String]>,
) -> anyhow::Result<CsvImportReport> {
    let mut report = CsvImportReport::default();

    for folder in matching_entries(root, folder_prefix, true)? {
        for file in matching_entries(&folder, CSV_FILE_PREFIX, false)? {
            let one = import_csv_file(store, &file, symbols).await?;
            report.files += 1;
            report.rows += one.rows;
            report.inserted += one.inserted;
        }
    }

    tracing::info!(
        folder_prefix,
        files = report.files,
        rows = report.rows,
        inserted = report.inserted,
        "csv import finished"
    );
    Ok(report)
}

pub async fn import_csv_file(
    store: &dyn SnapshotStore,
    path: &Path,
    symbols: Option<&[String]>,
) -> anyhow::Result<CsvImportReport> {
    tracing::info!(path = %path.display(), "now processing csv");

    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let (docs, rows) = documents_from_csv(file, symbols)?;

    let inserted = store.upsert(&docs).await?;
    tracing::info!(
        path = %path.display(),
        "Inserted {} new documents from {} CSV rows",
        inserted,
        rows
    );

    Ok(CsvImportReport {
        files: 1,
        rows,
        inserted,
    })
}

/// Groups rows by `UnderlyingSymbol` in first-seen order. A group's data date is the
/// `DataDate` of its first row.
fn documents_from_csv<R: std::io::Read>(
    input: R,
    symbols: Option<&[String]>,
) -> anyhow::Result<(Vec<SymbolDocument>, usize)> {
    let mut reader = csv::Reader::from_reader(input);
    let mut docs: Vec<SymbolDocument> = Vec::new();
    let mut by_symbol: HashMap<String, usize> = HashMap::new();
    let mut rows = 0;

    for (idx, row) in reader.deserialize::<ContractRecord>().enumerate() {
        let record = match row {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(row = idx + 1, error = %err, "skipping unparsable csv row");
                continue;
            }
        };

        if let Some(filter) = symbols {
            if !filter.iter().any(|s| *s == record.underlying_symbol) {
                continue;
            }
        }
        rows += 1;

        match by_symbol.get(&record.underlying_symbol) {
            Some(&idx) => docs[idx].chain.push(record),
            None => {
                by_symbol.insert(record.underlying_symbol.clone(), docs.len());
                docs.push(SymbolDocument::new(
                    record.underlying_symbol.clone(),
                    record.data_date,
                    vec![record],
                ));
            }
        }
    }

    Ok((docs, rows))
}

fn matching_entries(dir: &Path, prefix: &str, want_dirs: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let is_dir = entry.file_type()?.is_dir();
        if is_dir == want_dirs && entry.file_name().to_string_lossy().starts_with(prefix) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Normalizes and stores every cached payload of `date`. Returns the net insert count.
pub async fn load_cached_day(
    store: &dyn SnapshotStore,
    cache: &SnapshotCache,
    date: NaiveDate,
    store_raw: bool,
) -> anyhow::Result<u64> {
    let blobs = cache.load_day(date).await?;
    let mut docs = Vec::with_capacity(blobs.len());

    for blob in blobs {
        let snapshot = match ChainSnapshot::deserialize(&blob.raw) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(symbol = %blob.symbol, error = %err, "cached payload is not a chain snapshot; skipping");
                continue;
            }
        };

        let chain = normalize_chain(&snapshot, blob.data_date);
        let mut doc = SymbolDocument::new(blob.symbol, blob.data_date, chain);
        if store_raw {
            doc = doc.with_raw(blob.raw);
        }
        docs.push(doc);
    }

    let inserted = store.upsert(&docs).await?;
    tracing::info!(%date, blobs = docs.len(), inserted, "loaded snapshot cache");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optarchive_core::storage::snapshots::InMemorySnapshotStore;
    use serde_json::json;

    const HEADER: &str = "UnderlyingSymbol,UnderlyingPrice,Exchange,OptionSymbol,OptionExt,Type,Expiration,DataDate,Strike,Last,Bid,Ask,Volume,OpenInterest,IV,Delta,Gamma,Theta,Vega,AKA";

    fn csv_text() -> String {
        [
            HEADER,
            "AAPL,172.5,*,AAPL190301C00170000,,call,03/01/2019,02/22/2019,170,3.1,3,3.2,120,800,0.21,0.6,0.05,-0.1,0.08,AAPL190301C00170000",
            "AAPL,172.5,*,AAPL190301P00170000,,put,03/01/2019,02/22/2019,170,0.6,0.55,0.65,90,500,0.22,-0.4,0.05,-0.09,0.08,AAPL190301P00170000",
            "MSFT,110.9,*,MSFT190301C00110000,,call,03/01/2019,02/22/2019,110,1.5,1.4,1.6,10,20,NaN,0.5,0.04,,0.07,MSFT190301C00110000",
            "broken,row",
        ]
        .join("\n")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 2, 22).unwrap()
    }

    #[test]
    fn groups_rows_by_underlying() {
        let (docs, rows) = documents_from_csv(csv_text().as_bytes(), None).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].symbol, "AAPL");
        assert_eq!(docs[0].chain.len(), 2);
        assert_eq!(docs[0].data_date, day());
        assert_eq!(docs[1].chain[0].iv, None);
        assert_eq!(docs[1].chain[0].theta, None);
        assert_eq!(docs[1].chain[0].vega, Some(0.07));
    }

    #[test]
    fn interleaved_rows_keep_first_seen_order() {
        let text = [
            HEADER,
            "AAPL,172.5,*,AAPL190301C00170000,,call,03/01/2019,02/22/2019,170,3.1,3,3.2,120,800,0.21,0.6,0.05,-0.1,0.08,AAPL190301C00170000",
            "MSFT,110.9,*,MSFT190301C00110000,,call,03/01/2019,02/22/2019,110,1.5,1.4,1.6,10,20,0.3,0.5,0.04,-0.05,0.07,MSFT190301C00110000",
            "AAPL,172.5,*,AAPL190301P00170000,,put,03/01/2019,02/22/2019,170,0.6,0.55,0.65,,,0.22,-0.4,0.05,-0.09,0.08,AAPL190301P00170000",
        ]
        .join("\n");

        let (docs, rows) = documents_from_csv(text.as_bytes(), None).unwrap();
        assert_eq!(rows, 3);
        let symbols: Vec<&str> = docs.iter().map(|d| d.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(docs[0].chain.len(), 2);
        assert_eq!(docs[0].chain[1].option_symbol, "AAPL190301P00170000");
        assert_eq!((docs[0].chain[1].volume, docs[0].chain[1].open_interest), (0, 0));
        assert_eq!(docs[1].chain.len(), 1);
    }

    #[test]
    fn symbol_filter_limits_documents() {
        let filter = vec!["MSFT".to_string()];
        let (docs, rows) = documents_from_csv(csv_text().as_bytes(), Some(filter.as_slice())).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].symbol, "MSFT");
    }

    #[tokio::test]
    async fn imports_matching_folders_once() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("options_2019_02");
        let other = tmp.path().join("other");
        std::fs::create_dir_all(&wanted).unwrap();
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(wanted.join("L2_options_20190222.csv"), csv_text()).unwrap();
        std::fs::write(wanted.join("readme.txt"), "x").unwrap();
        std::fs::write(other.join("L2_options_20190222.csv"), csv_text()).unwrap();

        let store = InMemorySnapshotStore::new();
        let first = import_csv_folders(&store, tmp.path(), "options_", None).await.unwrap();
        assert_eq!(first, CsvImportReport { files: 1, rows: 3, inserted: 2 });

        let second = import_csv_folders(&store, tmp.path(), "options_", None).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replays_cached_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(tmp.path());
        let payload = json!({
            "symbol": "NVDA",
            "status": "SUCCESS",
            "underlying": {"last": 154.2},
            "callExpDateMap": {"2019-03-01:7": {"85.0": [{"exchangeName": "OPR", "totalVolume": 3, "openInterest": 12}]}},
            "putExpDateMap": {}
        });
        cache.put("NVDA", day(), &payload).await.unwrap();
        cache.put("SPX", day(), &json!("garbage")).await.unwrap();

        let store = InMemorySnapshotStore::new();
        assert_eq!(load_cached_day(&store, &cache, day(), true).await.unwrap(), 1);
        assert_eq!(load_cached_day(&store, &cache, day(), true).await.unwrap(), 0);

        let stored = store.get("NVDA", day()).await.unwrap();
        assert_eq!(stored.chain[0]["OptionSymbol"], json!("NVDA190301C00085000"));
        assert!(stored.raw.unwrap()["callExpDateMap"]["2019-03-01:7"].get("85,0").is_some());
    }
}
