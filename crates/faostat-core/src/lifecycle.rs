//! Per-dataset ingestion lifecycle.
//!
//! Each dataset moves through a fixed sequence of stages. The current stage
//! is persisted on the dataset's import record after every transition, which
//! is what lets an interrupted run be resumed.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Stage ───────────────────────────────────────────────────────────────────

/// Where a dataset is in its ingestion.
///
/// ```text
/// Pending → Extracting → ReconcilingDimensions → LoadingFacts → Completed
///    └──────────┴──────────────┴────────────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
  Pending,
  Extracting,
  ReconcilingDimensions,
  LoadingFacts,
  Completed,
  Failed,
}

impl IngestStage {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Failed) }

  /// The stage that follows `self` on the success path.
  pub fn next(self) -> Option<Self> {
    match self {
      Self::Pending => Some(Self::Extracting),
      Self::Extracting => Some(Self::ReconcilingDimensions),
      Self::ReconcilingDimensions => Some(Self::LoadingFacts),
      Self::LoadingFacts => Some(Self::Completed),
      Self::Completed | Self::Failed => None,
    }
  }

  pub fn can_transition_to(self, to: Self) -> bool {
    match to {
      Self::Failed => !self.is_terminal(),
      _ => self.next() == Some(to),
    }
  }

  /// Validate and perform a transition.
  pub fn transition(&mut self, to: Self) -> Result<()> {
    if !self.can_transition_to(to) {
      return Err(Error::IllegalTransition { from: *self, to });
    }
    *self = to;
    Ok(())
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Extracting => "extracting",
      Self::ReconcilingDimensions => "reconciling_dimensions",
      Self::LoadingFacts => "loading_facts",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }
}

impl fmt::Display for IngestStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for IngestStage {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "extracting" => Ok(Self::Extracting),
      "reconciling_dimensions" => Ok(Self::ReconcilingDimensions),
      "loading_facts" => Ok(Self::LoadingFacts),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::UnknownStage(other.to_owned())),
    }
  }
}

// ─── Import records ──────────────────────────────────────────────────────────

/// Persisted status of one import of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
  Running,
  Completed,
  Failed,
}

impl ImportStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }
}

impl FromStr for ImportStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "running" => Ok(Self::Running),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::UnknownImportStatus(other.to_owned())),
    }
  }
}

/// Handle returned when an import is registered; every subsequent write for
/// this import carries `load_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRun {
  pub load_id:      i64,
  pub dataset_code: String,
  pub run_id:       Uuid,
  pub started_at:   DateTime<Utc>,
}

/// An import as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
  pub load_id:      i64,
  pub dataset_code: String,
  pub run_id:       Uuid,
  pub stage:        IngestStage,
  pub status:       ImportStatus,
  pub rows_loaded:  u64,
  pub rows_skipped: u64,
  pub error:        Option<String>,
  pub started_at:   DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

// ─── Run summary ─────────────────────────────────────────────────────────────

/// Final outcome for one dataset in an orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatasetStatus {
  Completed { rows_loaded: u64, rows_skipped: u64 },
  Failed { stage: IngestStage, reason: String },
  Skipped { reason: String },
}

impl DatasetStatus {
  pub fn is_failed(&self) -> bool { matches!(self, Self::Failed { .. }) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn success_path_walks_every_stage() {
    let mut stage = IngestStage::Pending;
    for to in [
      IngestStage::Extracting,
      IngestStage::ReconcilingDimensions,
      IngestStage::LoadingFacts,
      IngestStage::Completed,
    ] {
      stage.transition(to).unwrap();
    }
    assert_eq!(stage, IngestStage::Completed);
  }

  #[test]
  fn failed_is_reachable_from_any_non_terminal_stage() {
    for from in [
      IngestStage::Pending,
      IngestStage::Extracting,
      IngestStage::ReconcilingDimensions,
      IngestStage::LoadingFacts,
    ] {
      assert!(from.can_transition_to(IngestStage::Failed), "{from}");
    }
    assert!(!IngestStage::Completed.can_transition_to(IngestStage::Failed));
    assert!(!IngestStage::Failed.can_transition_to(IngestStage::Failed));
  }

  #[test]
  fn skipping_a_stage_is_rejected() {
    let mut stage = IngestStage::Extracting;
    let err = stage.transition(IngestStage::LoadingFacts).unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { .. }));
    assert_eq!(stage, IngestStage::Extracting);
  }

  #[test]
  fn stage_names_round_trip() {
    for stage in [
      IngestStage::Pending,
      IngestStage::ReconcilingDimensions,
      IngestStage::Failed,
    ] {
      assert_eq!(stage.as_str().parse::<IngestStage>().unwrap(), stage);
    }
  }
}
