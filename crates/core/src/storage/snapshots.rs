use crate::domain::contract::SymbolDocument;
use crate::storage::lock::DataDateLock;
use crate::storage::sanitize::sanitize_keys;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Keyed by (data date, symbol); at most one document per key, first write wins.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Writes every document whose key is not stored yet and returns the net number
    /// of new documents (count after minus count before, over the batch's keys).
    /// Conflicting documents are logged and left alone.
    async fn upsert(&self, docs: &[SymbolDocument]) -> anyhow::Result<u64>;

    async fn count(&self) -> anyhow::Result<u64>;

    /// Distinct stored symbols, sorted.
    async fn known_symbols(&self) -> anyhow::Result<Vec<String>>;
}

/// Sanitized columns of one document, ready to bind.
struct SnapshotRow {
    chain: Value,
    raw: Option<Value>,
}

fn to_row(doc: &SymbolDocument) -> anyhow::Result<SnapshotRow> {
    let value = serde_json::to_value(doc)
        .with_context(|| format!("failed to serialize document for {}", doc.symbol))?;
    let Value::Object(mut obj) = sanitize_keys(value) else {
        anyhow::bail!("document for {} did not serialize to an object", doc.symbol);
    };

    Ok(SnapshotRow {
        chain: obj.remove("chain").unwrap_or(Value::Array(Vec::new())),
        raw: obj.remove("raw").filter(|v| !v.is_null()),
    })
}

/// Distinct (data date, symbol) keys of a batch. A key repeated within one batch
/// still counts once.
fn batch_keys(docs: &[SymbolDocument]) -> BTreeSet<(NaiveDate, String)> {
    docs.iter().map(|d| (d.data_date, d.symbol.clone())).collect()
}

fn log_duplicate(doc: &SymbolDocument) {
    tracing::info!(
        symbol = %doc.symbol,
        data_date = %doc.data_date,
        "Document for {} from {} already exists",
        doc.symbol,
        doc.data_date
    );
}

pub struct PgSnapshotStore {
    pool: sqlx::PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Claims `data_date` for this process. `None` when another run holds it.
    pub async fn lock_data_date(&self, data_date: NaiveDate) -> anyhow::Result<Option<DataDateLock>> {
        DataDateLock::try_acquire(&self.pool, data_date).await
    }

    async fn count_keys(&self, keys: &BTreeSet<(NaiveDate, String)>) -> anyhow::Result<u64> {
        let (dates, symbols): (Vec<NaiveDate>, Vec<String>) = keys.iter().cloned().unzip();
        let n: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM options_snapshots s \
             JOIN UNNEST($1::date[], $2::text[]) AS k(data_date, symbol) \
               ON s.data_date = k.data_date AND s.symbol = k.symbol",
        )
        .persistent(false)
        .bind(dates)
        .bind(symbols)
        .fetch_one(&self.pool)
        .await
        .context("count options_snapshots failed")?;
        Ok(n.max(0) as u64)
    }

    async fn insert_one(&self, doc: &SymbolDocument) -> anyhow::Result<bool> {
        let row = to_row(doc)?;
        let inserted_at: DateTime<Utc> = Utc::now();

        let res = sqlx::query(
            "INSERT INTO options_snapshots (id, symbol, data_date, chain, raw, inserted_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (data_date, symbol) DO NOTHING",
        )
        .persistent(false)
        .bind(Uuid::new_v4())
        .bind(&doc.symbol)
        .bind(doc.data_date)
        .bind(row.chain)
        .bind(row.raw)
        .bind(inserted_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "insert options_snapshots failed (symbol={}, data_date={})",
                doc.symbol, doc.data_date
            )
        })?;

        Ok(res.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn upsert(&self, docs: &[SymbolDocument]) -> anyhow::Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }

        let keys = batch_keys(docs);
        let before = self.count_keys(&keys).await?;

        for doc in docs {
            if !self.insert_one(doc).await? {
                log_duplicate(doc);
            }
        }

        let after = self.count_keys(&keys).await?;
        Ok(after.saturating_sub(before))
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT count(*) FROM options_snapshots")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .context("count options_snapshots failed")?;
        Ok(n.max(0) as u64)
    }

    async fn known_symbols(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT symbol FROM options_snapshots ORDER BY symbol")
                .persistent(false)
                .fetch_all(&self.pool)
                .await
                .context("select known symbols failed")?;
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub chain: Value,
    pub raw: Option<Value>,
    pub inserted_at: DateTime<Utc>,
}

/// Process-local store for dry runs and tests. Same conflict semantics as the
/// Postgres table.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    docs: Mutex<BTreeMap<(NaiveDate, String), StoredSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, symbol: &str, data_date: NaiveDate) -> Option<StoredSnapshot> {
        self.docs
            .lock()
            .await
            .get(&(data_date, symbol.to_string()))
            .cloned()
    }
}

fn present(map: &BTreeMap<(NaiveDate, String), StoredSnapshot>, keys: &BTreeSet<(NaiveDate, String)>) -> usize {
    keys.iter().filter(|k| map.contains_key(*k)).count()
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn upsert(&self, docs: &[SymbolDocument]) -> anyhow::Result<u64> {
        let mut map = self.docs.lock().await;
        let keys = batch_keys(docs);
        let before = present(&map, &keys);
        for doc in docs {
            let key = (doc.data_date, doc.symbol.clone());
            if map.contains_key(&key) {
                log_duplicate(doc);
                continue;
            }
            let row = to_row(doc)?;
            map.insert(
                key,
                StoredSnapshot {
                    chain: row.chain,
                    raw: row.raw,
                    inserted_at: Utc::now(),
                },
            );
        }
        let after = present(&map, &keys);

        Ok(after.saturating_sub(before) as u64)
    }

    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self.docs.lock().await.len() as u64)
    }

    async fn known_symbols(&self) -> anyhow::Result<Vec<String>> {
        let map = self.docs.lock().await;
        let mut out: Vec<String> = map.keys().map(|(_, s)| s.clone()).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }
}
