//! Merging a dataset's code lists into the shared dimension tables.

use faostat_core::{
  dimension::{DimensionCode, DimensionKind, DimensionRecord, ReconcileCounts, UpsertOutcome},
  store::IngestStore,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{error::StoreError, retry::{RetryPolicy, with_retry}};

/// Records sent to the store per upsert call.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// A code whose display name differed from the stored one. The new name
/// won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionConflict {
  pub kind:          DimensionKind,
  pub code:          DimensionCode,
  pub previous_name: String,
  pub current_name:  String,
}

/// Result of reconciling one dimension file.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
  pub counts:    ReconcileCounts,
  /// Every code reconciled, in input order.
  pub codes:     Vec<DimensionCode>,
  pub conflicts: Vec<DimensionConflict>,
}

pub struct Reconciler<'a, S> {
  store:      &'a S,
  retry:      RetryPolicy,
  chunk_size: usize,
}

impl<'a, S: IngestStore> Reconciler<'a, S> {
  pub fn new(store: &'a S, retry: RetryPolicy) -> Self {
    Self { store, retry, chunk_size: DEFAULT_CHUNK_SIZE }
  }

  pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
    self.chunk_size = chunk_size.max(1);
    self
  }

  /// Upsert `rows` into the `kind` table on behalf of `dataset_code`.
  ///
  /// An existing code with a different name is overwritten and reported as
  /// a conflict; it is never an error. Once this returns, every code is
  /// visible to fact loading.
  pub async fn reconcile<I>(
    &self,
    kind: DimensionKind,
    rows: I,
    dataset_code: &str,
  ) -> Result<Reconciled, StoreError>
  where
    I: IntoIterator<Item = DimensionRecord>,
  {
    let mut result = Reconciled::default();
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
      let chunk: Vec<DimensionRecord> = rows.by_ref().take(self.chunk_size).collect();
      let outcomes = with_retry(&self.retry, "upsert_dimensions", || {
        self
          .store
          .upsert_dimensions(kind, dataset_code.to_owned(), chunk.clone())
      })
      .await?;

      for (record, outcome) in chunk.into_iter().zip(outcomes) {
        result.counts.record(&outcome);
        if let UpsertOutcome::Updated { previous_name: Some(previous_name) } = outcome {
          warn!(
            dataset = dataset_code,
            %kind,
            code = %record.code,
            previous = %previous_name,
            current = %record.name,
            "dimension name conflict; keeping the newer name"
          );
          result.conflicts.push(DimensionConflict {
            kind,
            code: record.code.clone(),
            previous_name,
            current_name: record.name.clone(),
          });
        }
        result.codes.push(record.code);
      }
    }

    debug!(
      dataset = dataset_code,
      %kind,
      inserted = result.counts.inserted,
      updated = result.counts.updated,
      unchanged = result.counts.unchanged,
      "reconciled dimension"
    );
    Ok(result)
  }
}
