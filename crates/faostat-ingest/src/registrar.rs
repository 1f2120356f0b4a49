//! Dataset registry bookkeeping around one import.

use chrono::Utc;
use faostat_core::{
  dataset::{CompletedLoad, DatasetMetadata, ReimportPolicy},
  lifecycle::{ImportRun, IngestStage},
  store::IngestStore,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
  error::StoreError,
  retry::{RetryPolicy, with_retry},
};

pub struct Registrar<'a, S> {
  store:  &'a S,
  retry:  RetryPolicy,
  policy: ReimportPolicy,
  run_id: Uuid,
}

impl<'a, S: IngestStore> Registrar<'a, S> {
  /// `run_id` identifies the orchestrator run every import belongs to.
  pub fn new(store: &'a S, retry: RetryPolicy, policy: ReimportPolicy, run_id: Uuid) -> Self {
    Self { store, retry, policy, run_id }
  }

  /// Upsert the dataset row and open a running import for it.
  pub async fn register_start(&self, metadata: DatasetMetadata) -> Result<ImportRun, StoreError> {
    let started_at = Utc::now();
    let run = with_retry(&self.retry, "begin_import", || {
      self.store.begin_import(metadata.clone(), self.run_id, started_at)
    })
    .await?;
    debug!(dataset = %run.dataset_code, load_id = run.load_id, "import registered");
    Ok(run)
  }

  /// Persist `stage` as the import's checkpoint.
  pub async fn advance(&self, run: &ImportRun, stage: IngestStage) -> Result<(), StoreError> {
    with_retry(&self.retry, "set_import_stage", || {
      self.store.set_import_stage(run.load_id, stage)
    })
    .await
  }

  /// Publish the import's observations and record the final row counts.
  pub async fn register_complete(
    &self,
    run: &ImportRun,
    rows_loaded: u64,
    rows_skipped: u64,
  ) -> Result<(), StoreError> {
    let completed = CompletedLoad {
      load_id: run.load_id,
      rows_loaded,
      rows_skipped,
      completed_at: Utc::now(),
      policy: self.policy,
    };
    with_retry(&self.retry, "complete_import", || self.store.complete_import(completed)).await
  }

  pub async fn register_failure(
    &self,
    run: &ImportRun,
    stage: IngestStage,
    reason: &str,
  ) -> Result<(), StoreError> {
    with_retry(&self.retry, "fail_import", || {
      self.store.fail_import(run.load_id, stage, reason.to_owned())
    })
    .await
  }
}
