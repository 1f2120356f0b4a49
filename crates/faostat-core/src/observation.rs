//! Observation types: the rows of the fact table.

use serde::{Deserialize, Serialize};

/// A fact row ready to be inserted.
///
/// Every dimension reference is optional: many datasets have no item or
/// element dimension at all. `load_id` ties the row to the import that wrote
/// it, which is how re-imports replace earlier data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
  pub dataset_code: String,
  pub load_id:      i64,
  pub area_code:    Option<i64>,
  pub item_code:    Option<i64>,
  pub element_code: Option<i64>,
  pub year:         i32,
  pub year_code:    Option<String>,
  pub month_code:   Option<i64>,
  pub month_name:   Option<String>,
  /// `None` when the source reported no value (the flag usually says why).
  pub value:        Option<f64>,
  pub unit:         Option<String>,
  pub flag:         Option<String>,
  pub note:         Option<String>,
}

/// One row of the denormalised join view, as seen by downstream readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationView {
  pub id:               i64,
  pub dataset_code:     String,
  pub dataset_name:     Option<String>,
  pub area_code:        Option<i64>,
  pub area_name:        Option<String>,
  pub m49_code:         Option<String>,
  pub item_code:        Option<i64>,
  pub item_name:        Option<String>,
  pub element_code:     Option<i64>,
  pub element_name:     Option<String>,
  pub year:             i32,
  pub month_name:       Option<String>,
  pub value:            Option<f64>,
  pub unit:             Option<String>,
  pub flag:             Option<String>,
  pub flag_description: Option<String>,
  pub note:             Option<String>,
}
