//! Discovering dataset bundles and driving each one through its import.
//!
//! A dataset failure is recorded on its import row and in the run summary;
//! it never stops the remaining datasets.

use std::{
  collections::{HashMap, HashSet},
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use faostat_core::{
  dataset::DatasetMetadata,
  dimension::DimensionKind,
  lifecycle::{DatasetStatus, ImportRun, IngestStage},
  store::IngestStore,
};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
  archive::DatasetArchive,
  catalog::{self, Catalog},
  config::ImportConfig,
  error::{Error, Result},
  loader::{self, FactLoader, LoadReport},
  mapping::{DimensionFile, DimensionIndex, FactMapper},
  reconcile::Reconciler,
  registrar::Registrar,
  retry::with_retry,
};

/// File-name suffix of the bundles the pipeline ingests.
pub const ARCHIVE_SUFFIX: &str = "_(Normalized).zip";

// ─── Discovery ───────────────────────────────────────────────────────────────

/// A bundle found on disk, with the metadata registered for it.
#[derive(Debug, Clone)]
pub struct DatasetSource {
  pub code:     String,
  pub path:     PathBuf,
  pub metadata: DatasetMetadata,
}

/// Every `*_(Normalized).zip` below `dirs`, sorted by path.
///
/// An unreadable source directory is an error; unreadable entries below it
/// are logged and skipped.
pub fn discover(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
  let mut found = Vec::new();
  for dir in dirs {
    for entry in WalkDir::new(dir).follow_links(true) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(source) if source.depth() == 0 => {
          return Err(Error::Discovery { path: dir.clone(), source });
        }
        Err(err) => {
          warn!(error = %err, "skipping unreadable entry");
          continue;
        }
      };
      if entry.file_type().is_file() && is_bundle(entry.path()) {
        found.push(entry.into_path());
      }
    }
  }
  found.sort();
  found.dedup();
  Ok(found)
}

fn source_for(path: PathBuf, catalog: Option<&Catalog>) -> DatasetSource {
  let code = catalog::resolve_code(catalog, &path);
  let on_disk = DatasetMetadata {
    file_size: std::fs::metadata(&path).ok().map(|m| format!("{}KB", m.len().div_ceil(1024))),
    file_location: Some(path.display().to_string()),
    ..DatasetMetadata::new(code.clone())
  };
  let metadata = match catalog.and_then(|c| c.get(&code)) {
    Some(entry) => entry.metadata().merge_missing(&on_disk),
    None => on_disk,
  };
  DatasetSource { code, path, metadata }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetOutcome {
  pub dataset_code: String,
  pub archive:      PathBuf,
  #[serde(flatten)]
  pub status:       DatasetStatus,
}

/// What happened to every dataset considered by one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub run_id:   Uuid,
  pub datasets: Vec<DatasetOutcome>,
}

impl RunSummary {
  pub fn has_failures(&self) -> bool { self.datasets.iter().any(|d| d.status.is_failed()) }

  pub fn status_of(&self, code: &str) -> Option<&DatasetStatus> {
    self.datasets.iter().find(|d| d.dataset_code == code).map(|d| &d.status)
  }

  fn tally(&self) -> (usize, usize, usize) {
    self.datasets.iter().fold((0, 0, 0), |(c, f, s), d| match d.status {
      DatasetStatus::Completed { .. } => (c + 1, f, s),
      DatasetStatus::Failed { .. } => (c, f + 1, s),
      DatasetStatus::Skipped { .. } => (c, f, s + 1),
    })
  }
}

impl fmt::Display for RunSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for d in &self.datasets {
      match &d.status {
        DatasetStatus::Completed { rows_loaded, rows_skipped } => writeln!(
          f,
          "{:<12} completed  {rows_loaded} rows loaded, {rows_skipped} skipped",
          d.dataset_code
        )?,
        DatasetStatus::Failed { stage, reason } => {
          writeln!(f, "{:<12} failed     at {stage}: {reason}", d.dataset_code)?
        }
        DatasetStatus::Skipped { reason } => {
          writeln!(f, "{:<12} skipped    {reason}", d.dataset_code)?
        }
      }
    }
    let (completed, failed, skipped) = self.tally();
    write!(f, "{completed} completed, {failed} failed, {skipped} skipped")
  }
}

// ─── Per-dataset ingestion ───────────────────────────────────────────────────

/// Everything one dataset import needs; cheap to clone into worker tasks.
struct Ingestor<S> {
  store:  Arc<S>,
  config: Arc<ImportConfig>,
  run_id: Uuid,
}

impl<S> Clone for Ingestor<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), config: self.config.clone(), run_id: self.run_id }
  }
}

impl<S: IngestStore + 'static> Ingestor<S> {
  fn registrar(&self) -> Registrar<'_, S> {
    Registrar::new(
      &*self.store,
      self.config.retry_policy(),
      self.config.reimport_policy,
      self.run_id,
    )
  }

  async fn ingest(&self, source: &DatasetSource) -> DatasetStatus {
    let registrar = self.registrar();
    let run = match registrar.register_start(source.metadata.clone()).await {
      Ok(run) => run,
      Err(err) => {
        error!(dataset = %source.code, error = %err, "could not register import");
        return DatasetStatus::Failed { stage: IngestStage::Pending, reason: err.to_string() };
      }
    };

    let mut stage = IngestStage::Pending;
    match self.drive(&registrar, &run, source, &mut stage).await {
      Ok(report) => DatasetStatus::Completed {
        rows_loaded:  report.rows_loaded,
        rows_skipped: report.rows_skipped,
      },
      Err(err) => {
        let reason = err.to_string();
        error!(dataset = %source.code, %stage, error = %reason, "dataset failed");
        if let Err(err) = registrar.register_failure(&run, stage, &reason).await {
          error!(dataset = %source.code, error = %err, "could not record failure");
        }
        DatasetStatus::Failed { stage, reason }
      }
    }
  }

  async fn enter(
    &self,
    registrar: &Registrar<'_, S>,
    run: &ImportRun,
    stage: &mut IngestStage,
    to: IngestStage,
  ) -> Result<()> {
    stage.transition(to)?;
    registrar.advance(run, to).await?;
    info!(dataset = %run.dataset_code, load_id = run.load_id, stage = %to, "stage");
    Ok(())
  }

  async fn drive(
    &self,
    registrar: &Registrar<'_, S>,
    run: &ImportRun,
    source: &DatasetSource,
    stage: &mut IngestStage,
  ) -> Result<LoadReport> {
    let code = source.code.as_str();

    self.enter(registrar, run, stage, IngestStage::Extracting).await?;
    let path = source.path.clone();
    let (archive, dimensions) = tokio::task::spawn_blocking(move || {
      let mut archive = DatasetArchive::open(&path)?;
      let mut dimensions = Vec::new();
      for kind in DimensionKind::ALL {
        if let Some(file) = archive.read_dimension(kind)? {
          dimensions.push((kind, file));
        }
      }
      Ok::<_, crate::error::ArchiveError>((archive, dimensions))
    })
    .await??;

    self.enter(registrar, run, stage, IngestStage::ReconcilingDimensions).await?;
    let index = self.reconcile(code, dimensions).await?;

    self.enter(registrar, run, stage, IngestStage::LoadingFacts).await?;
    let mapper_code = code.to_owned();
    let load_id = run.load_id;
    let report = FactLoader::new(&*self.store, self.config.loader_options())
      .load(code, move |sink| {
        let mut archive = archive;
        loader::stream_facts(
          &mut archive,
          |columns| FactMapper::new(columns, mapper_code, load_id, index),
          sink,
        )
      })
      .await?;

    registrar
      .register_complete(run, report.rows_loaded, report.rows_skipped)
      .await?;
    stage.transition(IngestStage::Completed)?;
    info!(
      dataset = code,
      rows_loaded = report.rows_loaded,
      rows_skipped = report.rows_skipped,
      "dataset completed"
    );
    Ok(report)
  }

  /// Reconcile every dimension file the bundle carries, in kind order, and
  /// build the index fact rows resolve against.
  async fn reconcile(
    &self,
    code: &str,
    dimensions: Vec<(DimensionKind, DimensionFile)>,
  ) -> Result<DimensionIndex> {
    let retry = self.config.retry_policy();
    let reconciler = Reconciler::new(&*self.store, retry);
    let mut index = DimensionIndex::default();

    for (kind, file) in dimensions {
      if file.malformed > 0 {
        warn!(dataset = code, %kind, rows = file.malformed, "malformed dimension rows skipped");
      }
      let reconciled = reconciler.reconcile(kind, file.records, code).await?;
      info!(
        dataset = code,
        %kind,
        inserted = reconciled.counts.inserted,
        updated = reconciled.counts.updated,
        unchanged = reconciled.counts.unchanged,
        conflicts = reconciled.conflicts.len(),
        "dimension reconciled"
      );
      if !kind.is_global() {
        index.declare(kind);
        for c in &reconciled.codes {
          index.insert(kind, c);
        }
      }
    }

    // Shared dimensions resolve against everything stored, not only this
    // dataset's code lists.
    for kind in [DimensionKind::Area, DimensionKind::Flag] {
      let codes =
        with_retry(&retry, "dimension_codes", || self.store.dimension_codes(kind)).await?;
      for c in &codes {
        index.insert(kind, c);
      }
    }
    Ok(index)
  }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator<S> {
  ingestor: Ingestor<S>,
  catalog:  Option<Catalog>,
  reimport: bool,
}

impl<S: IngestStore + 'static> Orchestrator<S> {
  pub fn new(store: Arc<S>, config: ImportConfig) -> Self {
    Self {
      ingestor: Ingestor { store, config: Arc::new(config), run_id: Uuid::new_v4() },
      catalog:  None,
      reimport: false,
    }
  }

  pub fn with_catalog(mut self, catalog: Catalog) -> Self {
    self.catalog = Some(catalog);
    self
  }

  /// Re-import datasets that already have a completed import.
  pub fn reimport(mut self, reimport: bool) -> Self {
    self.reimport = reimport;
    self
  }

  pub fn run_id(&self) -> Uuid { self.ingestor.run_id }

  /// Discover bundles and ingest every dataset the filter admits.
  pub async fn run(&self) -> Result<RunSummary> {
    let config = &self.ingestor.config;
    let retry = config.retry_policy();
    let store = &*self.ingestor.store;
    info!(run_id = %self.run_id(), "starting import run");

    if let Some(catalog) = &self.catalog {
      self.register_catalog(catalog).await;
    }

    let paths = discover(&config.source_dirs)?;
    info!(archives = paths.len(), "discovered archives");
    let completed: HashSet<String> =
      with_retry(&retry, "completed_datasets", || store.completed_datasets())
        .await?
        .into_iter()
        .collect();

    let mut outcomes: Vec<Option<DatasetOutcome>> = Vec::new();
    let mut pending: Vec<(usize, DatasetSource)> = Vec::new();
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();

    for path in paths {
      let source = source_for(path, self.catalog.as_ref());
      if !config.accepts(&source.code) {
        debug!(dataset = %source.code, "filtered out");
        continue;
      }

      let skip = if let Some(first) = claimed.get(&source.code) {
        Some(format!("duplicate of {}", first.display()))
      } else if completed.contains(&source.code) && !self.reimport {
        Some("already imported".to_owned())
      } else {
        None
      };

      let slot = outcomes.len();
      match skip {
        Some(reason) => {
          info!(dataset = %source.code, %reason, "skipping");
          outcomes.push(Some(DatasetOutcome {
            dataset_code: source.code,
            archive:      source.path,
            status:       DatasetStatus::Skipped { reason },
          }));
        }
        None => {
          claimed.insert(source.code.clone(), source.path.clone());
          outcomes.push(None);
          pending.push((slot, source));
        }
      }
    }

    let total = pending.len();
    for (slot, outcome) in self.ingest_all(pending, total).await? {
      outcomes[slot] = Some(outcome);
    }

    let summary = RunSummary {
      run_id:   self.run_id(),
      datasets: outcomes.into_iter().flatten().collect(),
    };
    info!(run_id = %summary.run_id, has_failures = summary.has_failures(), "import run finished");
    Ok(summary)
  }

  async fn register_catalog(&self, catalog: &Catalog) {
    let retry = self.ingestor.config.retry_policy();
    let store = &*self.ingestor.store;
    for entry in catalog.entries() {
      let metadata = entry.metadata();
      if let Err(err) =
        with_retry(&retry, "upsert_dataset", || store.upsert_dataset(metadata.clone())).await
      {
        warn!(dataset = %entry.dataset_code, error = %err, "could not register catalog entry");
      }
    }
    info!(datasets = catalog.entries().len(), "catalog registered");
  }

  async fn ingest_all(
    &self,
    pending: Vec<(usize, DatasetSource)>,
    total: usize,
  ) -> Result<Vec<(usize, DatasetOutcome)>> {
    let workers = self.ingestor.config.workers.max(1);
    let mut done = Vec::with_capacity(pending.len());

    if workers == 1 {
      for (n, (slot, source)) in pending.into_iter().enumerate() {
        info!(dataset = %source.code, "processing {}/{total}: {}", n + 1, source.path.display());
        let status = self.ingestor.ingest(&source).await;
        done.push((slot, outcome(source, status)));
      }
      return Ok(done);
    }

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    for (n, (slot, source)) in pending.into_iter().enumerate() {
      let ingestor = self.ingestor.clone();
      let permits = permits.clone();
      tasks.spawn(async move {
        // The semaphore is never closed.
        let _permit = permits.acquire_owned().await.ok();
        info!(dataset = %source.code, "processing {}/{total}: {}", n + 1, source.path.display());
        let status = ingestor.ingest(&source).await;
        (slot, outcome(source, status))
      });
    }
    while let Some(joined) = tasks.join_next().await {
      done.push(joined?);
    }
    done.sort_by_key(|(slot, _)| *slot);
    Ok(done)
  }
}

fn outcome(source: DatasetSource, status: DatasetStatus) -> DatasetOutcome {
  DatasetOutcome { dataset_code: source.code, archive: source.path, status }
}

/// True if `path` looks like an ingestible bundle.
pub fn is_bundle(path: &Path) -> bool {
  path
    .file_name()
    .is_some_and(|n| n.to_string_lossy().ends_with(ARCHIVE_SUFFIX))
}
