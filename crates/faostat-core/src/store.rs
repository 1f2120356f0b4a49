//! The `IngestStore` trait.
//!
//! Implemented by storage backends (e.g. `faostat-store-sqlite`). The
//! ingestion pipeline depends on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  dataset::{CompletedLoad, DatasetMetadata},
  dimension::{DimensionCode, DimensionKind, DimensionRecord, UpsertOutcome},
  lifecycle::{ImportRecord, ImportRun, IngestStage},
  observation::NewObservation,
};

/// Abstraction over the relational store the pipeline populates.
///
/// Shared state (dimension tables and the dataset registry) is only mutated
/// through the upsert methods below, each of which must be atomic at the
/// store level so concurrent dataset imports cannot interleave a
/// read-check-write.
///
/// All methods return `Send` futures so the trait can be used from tasks on
/// a multi-threaded tokio runtime.
pub trait IngestStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Dimensions ────────────────────────────────────────────────────────

  /// Insert-or-update-if-different every record, in order, returning one
  /// outcome per record. For dataset-owned kinds the owning dataset is set
  /// to `dataset_code`.
  fn upsert_dimensions(
    &self,
    kind: DimensionKind,
    dataset_code: String,
    records: Vec<DimensionRecord>,
  ) -> impl Future<Output = Result<Vec<UpsertOutcome>, Self::Error>> + Send + '_;

  /// Every code currently stored for a dimension.
  fn dimension_codes(
    &self,
    kind: DimensionKind,
  ) -> impl Future<Output = Result<Vec<DimensionCode>, Self::Error>> + Send + '_;

  // ── Dataset registry ──────────────────────────────────────────────────

  /// Upsert a dataset's metadata without opening an import.
  fn upsert_dataset(
    &self,
    metadata: DatasetMetadata,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Upsert the dataset row and open a new import in the `running` state.
  ///
  /// Observations left behind by earlier imports that never completed are
  /// removed here.
  fn begin_import(
    &self,
    metadata: DatasetMetadata,
    run_id: Uuid,
    started_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<ImportRun, Self::Error>> + Send + '_;

  /// Persist the current stage of an import (the resume checkpoint).
  fn set_import_stage(
    &self,
    load_id: i64,
    stage: IngestStage,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Mark an import completed, publish its observations and apply the
  /// re-import policy, all in one transaction.
  fn complete_import(
    &self,
    completed: CompletedLoad,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Mark an import failed and discard the observations it wrote.
  fn fail_import(
    &self,
    load_id: i64,
    stage: IngestStage,
    reason: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Codes of every dataset with at least one completed import.
  fn completed_datasets(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// The most recent import of every dataset.
  fn latest_imports(
    &self,
  ) -> impl Future<Output = Result<Vec<ImportRecord>, Self::Error>> + Send + '_;

  // ── Facts ─────────────────────────────────────────────────────────────

  /// Insert one batch of observations atomically; returns the number
  /// inserted.
  fn insert_observations(
    &self,
    batch: Vec<NewObservation>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
