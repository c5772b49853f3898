use anyhow::Context;
use clap::{Parser, Subcommand};
use optarchive_core::config::{env_or, Settings};
use optarchive_core::domain::symbol::parse_symbol_list;
use optarchive_core::ingest::cache::SnapshotCache;
use optarchive_core::ingest::chains::{ChainFetcher, FetcherConfig};
use optarchive_core::ingest::universe::{CboeUniverse, UniverseError, UniverseOptions};
use optarchive_core::orchestrator::{run_daily, Orchestrator, OrchestratorOptions, RunPlan};
use optarchive_core::storage::snapshots::{InMemorySnapshotStore, PgSnapshotStore, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;
mod universe;

#[derive(Debug, Parser)]
#[command(name = "optarchive_worker")]
struct Args {
    /// Trading day to archive (YYYY-MM-DD). Defaults to today in US market time.
    #[arg(long, global = true)]
    data_date: Option<String>,

    /// Keep everything in memory instead of writing to the database.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and archive the day's option chains (default).
    Run,

    /// Import historical L2 options CSV dumps.
    ImportCsv {
        /// Directories under `--root` starting with this prefix are scanned.
        #[arg(long)]
        folder_prefix: String,

        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Comma separated underlying symbols to keep. All when omitted.
        #[arg(long)]
        symbols: Option<String>,
    },

    /// Normalize and store every cached payload of a day.
    LoadCache {
        /// Cache day (YYYY-MM-DD). Defaults to the data date.
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = run(args, &settings).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        if let Some(UniverseError::Integrity { got, min }) = err.downcast_ref::<UniverseError>() {
            tracing::error!(got, min, "symbol universe failed the sanity check; nothing was fetched");
        } else {
            tracing::error!(error = %format!("{err:#}"), "archiver run failed");
        }
    }
    result
}

async fn run(args: Args, settings: &Settings) -> anyhow::Result<()> {
    let data_date =
        optarchive_core::time::us_market::resolve_data_date(args.data_date.as_deref(), chrono::Utc::now())?;

    let pool = if args.dry_run {
        None
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(env_or("DATABASE_MAX_CONNECTIONS", 5))
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        optarchive_core::storage::migrate(&pool).await?;
        Some(pool)
    };

    let pg_store = pool.map(|pool| Arc::new(PgSnapshotStore::new(pool)));
    let store: Arc<dyn SnapshotStore> = match &pg_store {
        Some(pg) => pg.clone(),
        None => Arc::new(InMemorySnapshotStore::new()),
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_day(settings, store, pg_store.as_deref(), data_date, args.dry_run).await,
        Command::ImportCsv {
            folder_prefix,
            root,
            symbols,
        } => {
            let filter = symbols.as_deref().map(parse_symbol_list);
            ingest::import_csv_folders(store.as_ref(), &root, &folder_prefix, filter.as_deref()).await?;
            Ok(())
        }
        Command::LoadCache { date } => {
            let cache = SnapshotCache::from_env().context("SNAPSHOT_CACHE_DIR is required for load-cache")?;
            let date = match date {
                Some(s) => chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .with_context(|| format!("invalid --date {s:?}, expected YYYY-MM-DD"))?,
                None => data_date,
            };
            let store_raw = OrchestratorOptions::from_env().store_raw;
            ingest::load_cached_day(store.as_ref(), &cache, date, store_raw).await?;
            Ok(())
        }
    }
}

async fn run_day(
    settings: &Settings,
    store: Arc<dyn SnapshotStore>,
    pg_store: Option<&PgSnapshotStore>,
    data_date: chrono::NaiveDate,
    dry_run: bool,
) -> anyhow::Result<()> {
    let lock = match pg_store {
        Some(pg) => match pg.lock_data_date(data_date).await? {
            Some(lock) => Some(lock),
            None => {
                tracing::warn!(%data_date, "data_date lock not acquired; another run in progress");
                return Ok(());
            }
        },
        None => None,
    };

    let (shutdown_handle, shutdown) = optarchive_core::shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight symbols");
            shutdown_handle.trigger();
        }
    });

    let result = async {
        let fetcher = ChainFetcher::from_settings(settings, FetcherConfig::from_env())?;
        let universe_opts = UniverseOptions::from_env();
        let universe_source = CboeUniverse::new(&universe_opts)?;

        let orch = Orchestrator::new(
            Arc::new(fetcher),
            store,
            data_date,
            OrchestratorOptions::from_env(),
            shutdown,
        )
        .with_cache(SnapshotCache::from_env());

        let plan = RunPlan {
            mandatory: universe::mandatory_symbols(),
            min_universe_symbols: universe_opts.min_symbols,
        };

        tracing::info!(%data_date, dry_run, mandatory = plan.mandatory.len(), "starting archiver run");
        run_daily(&orch, &universe_source, &plan).await
    }
    .await;

    if let Some(lock) = lock {
        if let Err(err) = lock.release().await {
            tracing::warn!(error = %format!("{err:#}"), "data_date lock release failed; closing the session frees it");
        }
    }

    let summary = result?;
    alert_missing_mandatory(summary.mandatory_unresolved());
    Ok(())
}

fn alert_missing_mandatory(symbols: &[String]) {
    if symbols.is_empty() {
        return;
    }

    let list = symbols.join(", ");
    tracing::error!("**************************************************");
    tracing::error!(count = symbols.len(), "COULD NOT GET THESE MANDATORY SYMBOLS: {list}");
    tracing::error!("**************************************************");
    sentry::capture_message(
        &format!("could not get mandatory symbols: {list}"),
        sentry::Level::Error,
    );
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let args = Args::try_parse_from(["optarchive_worker", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert!(args.command.is_none());
    }

    #[test]
    fn parses_import_csv() {
        let args = Args::try_parse_from([
            "optarchive_worker",
            "import-csv",
            "--folder-prefix",
            "options_",
            "--symbols",
            "aapl,msft",
            "--data-date",
            "2019-02-22",
        ])
        .unwrap();

        assert_eq!(args.data_date.as_deref(), Some("2019-02-22"));
        match args.command {
            Some(Command::ImportCsv {
                folder_prefix,
                root,
                symbols,
            }) => {
                assert_eq!(folder_prefix, "options_");
                assert_eq!(root, PathBuf::from("."));
                assert_eq!(symbols.as_deref(), Some("aapl,msft"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn load_cache_requires_no_arguments() {
        let args = Args::try_parse_from(["optarchive_worker", "load-cache"]).unwrap();
        assert!(matches!(args.command, Some(Command::LoadCache { date: None })));
    }
}
