use crate::config::env_or;
use crate::domain::contract::SymbolDocument;
use crate::domain::symbol::{extra_class_form, is_extra_class_form};
use crate::ingest::cache::SnapshotCache;
use crate::ingest::chains::{ChainSource, FailureReason, FetchOutcome};
use crate::ingest::normalize::normalize_chain;
use crate::ingest::types::ChainSnapshot;
use crate::ingest::universe::{load_universe, UniverseSource};
use crate::shutdown::Shutdown;
use crate::storage::snapshots::SnapshotStore;
use anyhow::Result;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_KNOWN_ROUNDS: u32 = 2;
const DEFAULT_UNIVERSE_ROUNDS: u32 = 1;
const DEFAULT_MANDATORY_ROUNDS: u32 = 8;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Symbols in flight at once. `1` is strictly sequential.
    pub concurrency: usize,
    pub known_rounds: u32,
    pub universe_rounds: u32,
    pub mandatory_rounds: u32,
    /// Keep the sanitized broker payload next to the normalized chain.
    pub store_raw: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            known_rounds: DEFAULT_KNOWN_ROUNDS,
            universe_rounds: DEFAULT_UNIVERSE_ROUNDS,
            mandatory_rounds: DEFAULT_MANDATORY_ROUNDS,
            store_raw: true,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_env() -> Self {
        Self {
            concurrency: env_or("INGEST_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            known_rounds: env_or("KNOWN_SYMBOL_ROUNDS", DEFAULT_KNOWN_ROUNDS),
            universe_rounds: env_or("UNIVERSE_ROUNDS", DEFAULT_UNIVERSE_ROUNDS),
            mandatory_rounds: env_or("MANDATORY_SYMBOL_ROUNDS", DEFAULT_MANDATORY_ROUNDS),
            store_raw: env_or("STORE_RAW_PAYLOAD", true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// Fetched, normalized and handed to the store. `fetched_as` differs from
    /// `symbol` when the extra-class fallback answered.
    Stored {
        symbol: String,
        fetched_as: String,
        contracts: usize,
        inserted: u64,
    },
    /// Cache hit or already stored earlier in this run; nothing was fetched.
    Skipped { symbol: String },
    Failed { symbol: String, reason: String },
    Cancelled { symbol: String },
}

impl SymbolOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            SymbolOutcome::Stored { symbol, .. }
            | SymbolOutcome::Skipped { symbol }
            | SymbolOutcome::Failed { symbol, .. }
            | SymbolOutcome::Cancelled { symbol } => symbol,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, SymbolOutcome::Stored { .. } | SymbolOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundsReport {
    pub label: String,
    pub rounds_run: u32,
    pub attempted: usize,
    pub inserted: u64,
    /// Symbols still failing when the rounds stopped, in input order.
    pub unresolved: Vec<String>,
}

pub struct Orchestrator {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn SnapshotStore>,
    cache: Option<SnapshotCache>,
    data_date: NaiveDate,
    options: OrchestratorOptions,
    shutdown: Shutdown,
    completed: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn SnapshotStore>,
        data_date: NaiveDate,
        options: OrchestratorOptions,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            store,
            cache: None,
            data_date,
            options,
            shutdown,
            completed: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_cache(mut self, cache: Option<SnapshotCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn data_date(&self) -> NaiveDate {
        self.data_date
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// One symbol through fetch -> normalize -> store. Only storage errors are `Err`;
    /// symbol-level failures come back as [`SymbolOutcome::Failed`].
    pub async fn ingest_symbol(&self, symbol: &str) -> Result<SymbolOutcome> {
        if self.completed.lock().await.contains(symbol) {
            return Ok(SymbolOutcome::Skipped {
                symbol: symbol.to_string(),
            });
        }

        if let Some(cache) = &self.cache {
            match cache.contains(symbol, self.data_date).await {
                Ok(true) => {
                    tracing::info!(symbol, data_date = %self.data_date, "already cached; skipping fetch");
                    return Ok(SymbolOutcome::Skipped {
                        symbol: symbol.to_string(),
                    });
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(symbol, error = %err, "cache lookup failed; fetching anyway");
                }
            }
        }

        let outcome = self.source.fetch_chain(symbol, &self.shutdown).await;
        let outcome = match outcome {
            FetchOutcome::PermanentFailure { reason, .. } if !is_extra_class_form(symbol) => {
                let alt = extra_class_form(symbol);
                tracing::info!(symbol, alt = %alt, reason = ?reason, "symbol rejected; trying extra-class form");
                let retried = self.source.fetch_chain(&alt, &self.shutdown).await;
                (alt, retried)
            }
            other => (symbol.to_string(), other),
        };

        match outcome {
            (fetched_as, FetchOutcome::Snapshot { snapshot, raw, .. }) => {
                self.persist(symbol, fetched_as, &snapshot, raw).await
            }
            (fetched_as, FetchOutcome::PermanentFailure { reason, attempts }) => {
                let reason = match reason {
                    FailureReason::BrokerStatus(status) => format!("broker status {status} for {fetched_as}"),
                    FailureReason::AmbiguousResponse => format!("ambiguous response for {fetched_as}"),
                };
                tracing::info!(symbol, attempts, %reason, "symbol failed");
                Ok(SymbolOutcome::Failed {
                    symbol: symbol.to_string(),
                    reason,
                })
            }
            (fetched_as, FetchOutcome::Exhausted { attempts, errors }) => {
                let last = errors.last().map(|e| e.to_string()).unwrap_or_default();
                Ok(SymbolOutcome::Failed {
                    symbol: symbol.to_string(),
                    reason: format!("{fetched_as}: retry budget exhausted after {attempts} attempts ({last})"),
                })
            }
            (_, FetchOutcome::Cancelled { .. }) => Ok(SymbolOutcome::Cancelled {
                symbol: symbol.to_string(),
            }),
        }
    }

    async fn persist(
        &self,
        symbol: &str,
        fetched_as: String,
        snapshot: &ChainSnapshot,
        raw: Value,
    ) -> Result<SymbolOutcome> {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(symbol, self.data_date, &raw).await {
                tracing::warn!(symbol, error = %err, "failed to write snapshot cache");
            }
        }

        let chain = normalize_chain(snapshot, self.data_date);
        let contracts = chain.len();
        let mut doc = SymbolDocument::new(symbol, self.data_date, chain);
        if self.options.store_raw {
            doc = doc.with_raw(raw);
        }

        let inserted = self.store.upsert(std::slice::from_ref(&doc)).await?;
        self.completed.lock().await.insert(symbol.to_string());

        tracing::info!(symbol, fetched_as = %fetched_as, contracts, inserted, "stored option chain");
        Ok(SymbolOutcome::Stored {
            symbol: symbol.to_string(),
            fetched_as,
            contracts,
            inserted,
        })
    }

    /// Runs up to `max_rounds` passes over `symbols`, each pass retrying only the
    /// symbols the previous one failed.
    pub async fn run_rounds(&self, label: &str, symbols: &[String], max_rounds: u32) -> Result<RoundsReport> {
        let mut pending: Vec<String> = symbols.to_vec();
        let mut rounds_run = 0;
        let mut inserted = 0;
        let concurrency = self.options.concurrency.max(1);

        while rounds_run < max_rounds && !pending.is_empty() {
            if self.shutdown.is_triggered() {
                tracing::warn!(label, pending = pending.len(), "shutdown requested; stopping rounds");
                break;
            }
            rounds_run += 1;
            tracing::info!(label, round = rounds_run, max_rounds, symbols = pending.len(), "starting round");

            let outcomes: Vec<SymbolOutcome> = stream::iter(pending.iter())
                .map(|symbol| self.ingest_symbol(symbol))
                .buffered(concurrency)
                .try_collect()
                .await?;

            let mut failed = Vec::new();
            for outcome in outcomes {
                match outcome {
                    SymbolOutcome::Stored { inserted: n, .. } => inserted += n,
                    SymbolOutcome::Skipped { .. } => {}
                    SymbolOutcome::Failed { symbol, .. } | SymbolOutcome::Cancelled { symbol } => {
                        failed.push(symbol)
                    }
                }
            }

            tracing::info!(label, round = rounds_run, failed = failed.len(), "round finished");
            pending = failed;
        }

        Ok(RoundsReport {
            label: label.to_string(),
            rounds_run,
            attempted: symbols.len(),
            inserted,
            unresolved: pending,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub mandatory: Vec<String>,
    pub min_universe_symbols: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub data_date: NaiveDate,
    pub universe_size: usize,
    pub known: RoundsReport,
    pub universe: RoundsReport,
    pub mandatory: RoundsReport,
}

impl RunSummary {
    pub fn inserted(&self) -> u64 {
        self.known.inserted + self.universe.inserted + self.mandatory.inserted
    }

    pub fn mandatory_unresolved(&self) -> &[String] {
        &self.mandatory.unresolved
    }
}

/// A full day: validate the universe (fatal if it looks broken, before any fetch),
/// then the known symbols, the universe and the mandatory list, each with its own
/// round budget.
pub async fn run_daily(
    orch: &Orchestrator,
    universe: &dyn UniverseSource,
    plan: &RunPlan,
) -> Result<RunSummary> {
    let universe_symbols = load_universe(universe, plan.min_universe_symbols).await?;

    let known_symbols = orch.store.known_symbols().await?;
    tracing::info!(count = known_symbols.len(), "got symbols already in the store");

    let opts = orch.options();
    let known = orch
        .run_rounds("known", &known_symbols, opts.known_rounds)
        .await?;
    let universe_report = orch
        .run_rounds("universe", &universe_symbols, opts.universe_rounds)
        .await?;
    let mandatory = orch
        .run_rounds("mandatory", &plan.mandatory, opts.mandatory_rounds)
        .await?;

    let summary = RunSummary {
        data_date: orch.data_date(),
        universe_size: universe_symbols.len(),
        known,
        universe: universe_report,
        mandatory,
    };
    tracing::info!(
        data_date = %summary.data_date,
        universe = summary.universe_size,
        inserted = summary.inserted(),
        mandatory_unresolved = summary.mandatory_unresolved().len(),
        "daily run finished"
    );
    Ok(summary)
}
