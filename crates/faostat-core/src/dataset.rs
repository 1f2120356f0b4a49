//! Dataset metadata and the re-import policy.
//!
//! A dataset is one FAOSTAT-published table (e.g. crop production, `QCL`).
//! Its metadata row is registered before ingestion starts so that partial
//! runs are visible, and finalised once the facts are loaded.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Descriptive metadata for one dataset, keyed by its short code.
///
/// Everything except `code` is optional: the catalog may not list a dataset
/// that was found on disk, in which case only the code and file facts are
/// known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
  pub code:          String,
  pub name:          Option<String>,
  pub topic:         Option<String>,
  pub description:   Option<String>,
  pub contact:       Option<String>,
  pub email:         Option<String>,
  /// When FAOSTAT last updated the source data.
  pub date_update:   Option<String>,
  /// Size of the source bundle as published (e.g. `"5373KB"`).
  pub file_size:     Option<String>,
  /// Row count of the source bundle as published.
  pub file_rows:     Option<i64>,
  /// Where the bundle was found or is published.
  pub file_location: Option<String>,
}

impl DatasetMetadata {
  /// Metadata with only the code set.
  pub fn new(code: impl Into<String>) -> Self {
    Self { code: code.into(), ..Self::default() }
  }

  /// Fill every unset field of `self` from `other`.
  pub fn merge_missing(mut self, other: &DatasetMetadata) -> Self {
    fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
      if slot.is_none() {
        slot.clone_from(from);
      }
    }
    fill(&mut self.name, &other.name);
    fill(&mut self.topic, &other.topic);
    fill(&mut self.description, &other.description);
    fill(&mut self.contact, &other.contact);
    fill(&mut self.email, &other.email);
    fill(&mut self.date_update, &other.date_update);
    fill(&mut self.file_size, &other.file_size);
    fill(&mut self.file_rows, &other.file_rows);
    fill(&mut self.file_location, &other.file_location);
    self
  }
}

/// What happens to a dataset's prior observations when it is imported again.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReimportPolicy {
  /// The new load atomically replaces every earlier load of the dataset.
  #[default]
  Replace,
  /// The new load is added alongside earlier loads.
  Append,
}

impl ReimportPolicy {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Replace => "replace",
      Self::Append => "append",
    }
  }
}

impl fmt::Display for ReimportPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ReimportPolicy {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "replace" => Ok(Self::Replace),
      "append" => Ok(Self::Append),
      other => Err(Error::UnknownPolicy(other.to_owned())),
    }
  }
}

/// Final numbers handed to the store when a load completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedLoad {
  pub load_id:      i64,
  pub rows_loaded:  u64,
  pub rows_skipped: u64,
  pub completed_at: DateTime<Utc>,
  pub policy:       ReimportPolicy,
}
