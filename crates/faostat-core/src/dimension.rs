//! Dimension types: the shared lookup tables referenced by observations.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// The four dimensions an observation can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
  Area,
  Item,
  Element,
  Flag,
}

impl DimensionKind {
  /// Reconciliation order within one dataset.
  pub const ALL: [DimensionKind; 4] =
    [Self::Area, Self::Item, Self::Element, Self::Flag];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Area => "area",
      Self::Item => "item",
      Self::Element => "element",
      Self::Flag => "flag",
    }
  }

  /// Global dimensions are shared by every dataset; the others are owned by
  /// the dataset that defined them.
  pub fn is_global(self) -> bool { matches!(self, Self::Area | Self::Flag) }
}

impl fmt::Display for DimensionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Code ────────────────────────────────────────────────────────────────────

/// The natural key of a dimension row. Area, item and element codes are
/// integers; flag codes are short strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionCode {
  Int(i64),
  Text(String),
}

impl fmt::Display for DimensionCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(i) => write!(f, "{i}"),
      Self::Text(s) => f.write_str(s),
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One row read from a dataset's dimension CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRecord {
  pub code:          DimensionCode,
  /// Display name (for flags, the description).
  pub name:          String,
  /// Standardised cross-walk code: M49 for areas, CPC for items.
  pub standard_code: Option<String>,
}

impl DimensionRecord {
  pub fn new(code: DimensionCode, name: impl Into<String>) -> Self {
    Self { code, name: name.into(), standard_code: None }
  }

  pub fn with_standard_code(mut self, code: impl Into<String>) -> Self {
    self.standard_code = Some(code.into());
    self
  }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// What a single upsert did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
  Inserted,
  /// The row existed with different attributes and was overwritten.
  /// `previous_name` is set when the display name changed.
  Updated { previous_name: Option<String> },
  Unchanged,
}

/// Per-call reconciliation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
  pub inserted:  u64,
  pub updated:   u64,
  pub unchanged: u64,
}

impl ReconcileCounts {
  pub fn record(&mut self, outcome: &UpsertOutcome) {
    match outcome {
      UpsertOutcome::Inserted => self.inserted += 1,
      UpsertOutcome::Updated { .. } => self.updated += 1,
      UpsertOutcome::Unchanged => self.unchanged += 1,
    }
  }

  pub fn total(&self) -> u64 { self.inserted + self.updated + self.unchanged }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_track_each_outcome() {
    let mut counts = ReconcileCounts::default();
    counts.record(&UpsertOutcome::Inserted);
    counts.record(&UpsertOutcome::Updated { previous_name: Some("A".into()) });
    counts.record(&UpsertOutcome::Unchanged);
    counts.record(&UpsertOutcome::Unchanged);

    assert_eq!(counts, ReconcileCounts { inserted: 1, updated: 1, unchanged: 2 });
    assert_eq!(counts.total(), 4);
  }

  #[test]
  fn only_area_and_flag_are_global() {
    assert!(DimensionKind::Area.is_global());
    assert!(DimensionKind::Flag.is_global());
    assert!(!DimensionKind::Item.is_global());
    assert!(!DimensionKind::Element.is_global());
  }
}
