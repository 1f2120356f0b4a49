//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, UUIDs as hyphenated lowercase
//! strings, enums as their snake_case names.

use chrono::{DateTime, Utc};
use faostat_core::{
  dimension::{DimensionCode, DimensionKind, DimensionRecord},
  lifecycle::{ImportRecord, ImportStatus, IngestStage},
};
use rusqlite::types::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ─────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Counts ──────────────────────────────────────────────────────────────────

/// SQLite integers are signed; row counts never approach the limit.
pub fn encode_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

pub fn decode_count(n: i64) -> u64 { u64::try_from(n).unwrap_or(0) }

// ─── Dimension codes ─────────────────────────────────────────────────────────

/// Bind value for a dimension code, checking it has the type `kind` stores.
pub fn encode_code(kind: DimensionKind, code: &DimensionCode) -> Result<Value> {
  match (kind, code) {
    (DimensionKind::Flag, DimensionCode::Text(s)) => Ok(Value::Text(s.clone())),
    (DimensionKind::Flag, DimensionCode::Int(_)) => Err(Error::CodeType {
      kind: kind.as_str(),
      code: code.to_string(),
    }),
    (_, DimensionCode::Int(i)) => Ok(Value::Integer(*i)),
    (_, DimensionCode::Text(_)) => Err(Error::CodeType {
      kind: kind.as_str(),
      code: code.to_string(),
    }),
  }
}

pub fn decode_code(kind: DimensionKind, value: Value) -> Result<DimensionCode> {
  match value {
    Value::Integer(i) if kind != DimensionKind::Flag => Ok(DimensionCode::Int(i)),
    Value::Text(s) if kind == DimensionKind::Flag => Ok(DimensionCode::Text(s)),
    other => Err(Error::MalformedCode {
      kind:  kind.as_str(),
      value: format!("{other:?}"),
    }),
  }
}

// ─── Dimension tables ────────────────────────────────────────────────────────

/// Per-kind SQL. Every `select` returns `(name, standard_code, dataset_code)`
/// with NULL for columns the table does not have. Every `upsert` only writes
/// when something differs, so `changes()` reports 0 for identical rows; its
/// parameters are the ones [`upsert_params`] produces.
pub struct DimensionSql {
  pub select: &'static str,
  pub upsert: &'static str,
  pub codes:  &'static str,
  pub count:  &'static str,
  pub name:   &'static str,
}

pub fn dimension_sql(kind: DimensionKind) -> &'static DimensionSql {
  match kind {
    DimensionKind::Area => &AREA_SQL,
    DimensionKind::Item => &ITEM_SQL,
    DimensionKind::Element => &ELEMENT_SQL,
    DimensionKind::Flag => &FLAG_SQL,
  }
}

/// Bind values for `dimension_sql(kind).upsert`.
pub fn upsert_params(
  kind: DimensionKind,
  code: Value,
  record: &DimensionRecord,
  dataset_code: &str,
) -> Vec<Value> {
  let name = Value::Text(record.name.clone());
  let standard = record
    .standard_code
    .clone()
    .map_or(Value::Null, Value::Text);
  let dataset = Value::Text(dataset_code.to_owned());

  match kind {
    DimensionKind::Area => vec![code, name, standard],
    DimensionKind::Item => vec![code, name, standard, dataset],
    DimensionKind::Element => vec![code, name, dataset],
    DimensionKind::Flag => vec![code, name],
  }
}

static AREA_SQL: DimensionSql = DimensionSql {
  select: "SELECT area_name, m49_code, NULL FROM areas WHERE area_code = ?1",
  upsert: "INSERT INTO areas (area_code, area_name, m49_code)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (area_code) DO UPDATE SET
             area_name = excluded.area_name,
             m49_code  = excluded.m49_code
           WHERE areas.area_name IS NOT excluded.area_name
              OR areas.m49_code  IS NOT excluded.m49_code",
  codes:  "SELECT area_code FROM areas ORDER BY area_code",
  count:  "SELECT COUNT(*) FROM areas",
  name:   "SELECT area_name FROM areas WHERE area_code = ?1",
};

static ITEM_SQL: DimensionSql = DimensionSql {
  select: "SELECT item_name, cpc_code, dataset_code FROM items WHERE item_code = ?1",
  upsert: "INSERT INTO items (item_code, item_name, cpc_code, dataset_code)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (item_code) DO UPDATE SET
             item_name    = excluded.item_name,
             cpc_code     = excluded.cpc_code,
             dataset_code = excluded.dataset_code
           WHERE items.item_name    IS NOT excluded.item_name
              OR items.cpc_code     IS NOT excluded.cpc_code
              OR items.dataset_code IS NOT excluded.dataset_code",
  codes:  "SELECT item_code FROM items ORDER BY item_code",
  count:  "SELECT COUNT(*) FROM items",
  name:   "SELECT item_name FROM items WHERE item_code = ?1",
};

static ELEMENT_SQL: DimensionSql = DimensionSql {
  select: "SELECT element_name, NULL, dataset_code FROM elements WHERE element_code = ?1",
  upsert: "INSERT INTO elements (element_code, element_name, dataset_code)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (element_code) DO UPDATE SET
             element_name = excluded.element_name,
             dataset_code = excluded.dataset_code
           WHERE elements.element_name IS NOT excluded.element_name
              OR elements.dataset_code IS NOT excluded.dataset_code",
  codes:  "SELECT element_code FROM elements ORDER BY element_code",
  count:  "SELECT COUNT(*) FROM elements",
  name:   "SELECT element_name FROM elements WHERE element_code = ?1",
};

static FLAG_SQL: DimensionSql = DimensionSql {
  select: "SELECT flag_description, NULL, NULL FROM flags WHERE flag_code = ?1",
  upsert: "INSERT INTO flags (flag_code, flag_description)
           VALUES (?1, ?2)
           ON CONFLICT (flag_code) DO UPDATE SET
             flag_description = excluded.flag_description
           WHERE flags.flag_description IS NOT excluded.flag_description",
  codes:  "SELECT flag_code FROM flags ORDER BY flag_code",
  count:  "SELECT COUNT(*) FROM flags",
  name:   "SELECT flag_description FROM flags WHERE flag_code = ?1",
};

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `imports` row.
pub struct RawImport {
  pub load_id:      i64,
  pub dataset_code: String,
  pub run_id:       String,
  pub stage:        String,
  pub status:       String,
  pub rows_loaded:  i64,
  pub rows_skipped: i64,
  pub error:        Option<String>,
  pub started_at:   String,
  pub completed_at: Option<String>,
}

pub const IMPORT_COLUMNS: &str = "load_id, dataset_code, run_id, stage, status,
  rows_loaded, rows_skipped, error, started_at, completed_at";

impl RawImport {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      load_id:      row.get(0)?,
      dataset_code: row.get(1)?,
      run_id:       row.get(2)?,
      stage:        row.get(3)?,
      status:       row.get(4)?,
      rows_loaded:  row.get(5)?,
      rows_skipped: row.get(6)?,
      error:        row.get(7)?,
      started_at:   row.get(8)?,
      completed_at: row.get(9)?,
    })
  }

  pub fn into_record(self) -> Result<ImportRecord> {
    Ok(ImportRecord {
      load_id:      self.load_id,
      dataset_code: self.dataset_code,
      run_id:       decode_uuid(&self.run_id)?,
      stage:        self.stage.parse::<IngestStage>()?,
      status:       self.status.parse::<ImportStatus>()?,
      rows_loaded:  decode_count(self.rows_loaded),
      rows_skipped: decode_count(self.rows_skipped),
      error:        self.error,
      started_at:   decode_dt(&self.started_at)?,
      completed_at: self.completed_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}
