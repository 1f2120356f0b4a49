//! `faostat-import`: load FAOSTAT bulk downloads into SQLite.
//!
//! ```text
//! faostat-import run --config import.toml --json
//! faostat-import status
//! faostat-import inspect /data/faostat
//! ```

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use faostat_core::store::IngestStore;
use faostat_ingest::{ImportConfig, Orchestrator, catalog::Catalog, inspect};
use faostat_store_sqlite::SqliteStore;
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "FAOSTAT bulk importer")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Import every dataset bundle found in the source directories.
  Run(RunArgs),
  /// Show the latest import of every dataset.
  Status(ConfigArgs),
  /// Report column presence across bundles without importing anything.
  Inspect {
    /// Directories searched for `*_(Normalized).zip` bundles.
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
    #[arg(long)]
    json: bool,
  },
}

#[derive(Args)]
struct ConfigArgs {
  /// Path to the TOML configuration file.
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// SQLite database file; overrides `store_path`.
  #[arg(long)]
  store: Option<PathBuf>,

  /// Print JSON instead of text.
  #[arg(long)]
  json: bool,
}

#[derive(Args)]
struct RunArgs {
  #[command(flatten)]
  common: ConfigArgs,

  /// Import datasets again even if a completed import exists.
  #[arg(long)]
  reimport: bool,

  /// Only import this dataset code; may be repeated.
  #[arg(long = "dataset", value_name = "CODE")]
  datasets: Vec<String>,

  /// Datasets processed concurrently; overrides `workers`.
  #[arg(long)]
  workers: Option<usize>,

  /// Directory searched for bundles; replaces `source_dirs`. May be repeated.
  #[arg(long = "source", value_name = "DIR")]
  sources: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  match Cli::parse().command {
    Command::Run(args) => run(args).await,
    Command::Status(args) => status(args).await,
    Command::Inspect { dirs, json } => {
      let report = inspect::inspect(&dirs).context("inspection failed")?;
      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        print!("{report}");
      }
      Ok(ExitCode::SUCCESS)
    }
  }
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<ImportConfig> {
  let mut cfg = ImportConfig::load(args.config.as_deref()).context("failed to load configuration")?;
  if let Some(store) = &args.store {
    cfg.store_path = store.clone();
  }
  cfg.store_path = expand_tilde(&cfg.store_path);
  Ok(cfg)
}

async fn open_store(cfg: &ImportConfig) -> anyhow::Result<SqliteStore> {
  let store = SqliteStore::open(&cfg.store_path, cfg.store_timeout())
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let busy_timeout = store.busy_timeout().await?;
  debug!(path = ?cfg.store_path, ?busy_timeout, "store opened");
  Ok(store)
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
  let mut cfg = load_config(&args.common)?;
  if !args.datasets.is_empty() {
    cfg.include = args.datasets;
  }
  if let Some(workers) = args.workers {
    cfg.workers = workers.max(1);
  }
  if !args.sources.is_empty() {
    cfg.source_dirs = args.sources;
  }

  let catalog = cfg
    .catalog_path
    .as_ref()
    .map(|path| {
      Catalog::load(path).with_context(|| format!("failed to read catalog {path:?}"))
    })
    .transpose()?;

  let store = open_store(&cfg).await?;
  let mut orchestrator = Orchestrator::new(Arc::new(store), cfg).reimport(args.reimport);
  if let Some(catalog) = catalog {
    orchestrator = orchestrator.with_catalog(catalog);
  }

  let summary = orchestrator.run().await.context("import run failed")?;
  if args.common.json {
    println!("{}", serde_json::to_string_pretty(&summary)?);
  } else {
    println!("{summary}");
  }

  Ok(if summary.has_failures() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn status(args: ConfigArgs) -> anyhow::Result<ExitCode> {
  let cfg = load_config(&args)?;
  let store = open_store(&cfg).await?;
  let imports = store.latest_imports().await.context("failed to read imports")?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&imports)?);
    return Ok(ExitCode::SUCCESS);
  }
  for i in &imports {
    let finished = i
      .completed_at
      .map(|t| t.to_rfc3339())
      .unwrap_or_else(|| "-".to_owned());
    println!(
      "{:<12} {:<10} {:<24} loaded={} skipped={} finished={finished}{}",
      i.dataset_code,
      i.status.as_str(),
      i.stage.as_str(),
      i.rows_loaded,
      i.rows_skipped,
      i.error.as_deref().map(|e| format!(" error={e}")).unwrap_or_default(),
    );
  }
  Ok(ExitCode::SUCCESS)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
