//! Error taxonomy for the ingestion pipeline.
//!
//! [`ArchiveError`] and [`LoadError`] are fatal for the dataset being
//! ingested, never for the run. [`RowError`] is per row and tolerated up to
//! the configured skip rate. [`StoreError`] wraps whatever the backend
//! reports once retries are exhausted.

use std::{path::PathBuf, time::Duration};

use faostat_core::dimension::DimensionKind;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("archive error: {0}")]
  Archive(#[from] ArchiveError),

  #[error("load error: {0}")]
  Load(#[from] LoadError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("catalog error: {0}")]
  Catalog(#[from] CatalogError),

  #[error("core error: {0}")]
  Core(#[from] faostat_core::Error),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("source directory {path:?} is unreadable: {source}")]
  Discovery {
    path:   PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Archive ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("cannot read {path:?}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{path:?} is not a readable zip archive: {source}")]
  Zip {
    path:   PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("{path:?} has no {member} member")]
  MissingMember { path: PathBuf, member: &'static str },

  #[error("member {member:?} has no {column:?} column")]
  MissingColumn { member: String, column: &'static str },

  #[error("member {member:?} is malformed: {source}")]
  Csv {
    member: String,
    #[source]
    source: csv::Error,
  },
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// Why a single CSV row was not inserted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
  #[error("{dimension} code {code} is not known for this dataset")]
  UnresolvedCode { dimension: DimensionKind, code: String },

  #[error("malformed {column} {value:?}")]
  MalformedCode { column: &'static str, value: String },

  #[error("malformed year {0:?}")]
  MalformedYear(String),

  #[error("missing year")]
  MissingYear,
}

/// A rejected row, identified by its 1-based line in the member file.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {kind}")]
pub struct RowError {
  pub line: u64,
  pub kind: RowErrorKind,
}

// ─── Load ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoadError {
  /// Too many rows were rejected: the dataset does not match the schema
  /// rather than carrying a few bad rows.
  #[error(
    "{skipped} of {seen} rows rejected ({ratio:.1}% > {max:.1}%); first: {first}"
  )]
  SkipRateExceeded {
    skipped: u64,
    seen:    u64,
    ratio:   f64,
    max:     f64,
    first:   String,
  },

  /// Every row was rejected, however few there were.
  #[error("all {seen} rows rejected; first: {first}")]
  NothingLoaded { seen: u64, first: String },
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store call timed out after {0:?}")]
  Timeout(Duration),

  #[error("{operation} failed after {attempts} attempt(s): {source}")]
  Backend {
    operation: &'static str,
    attempts:  u32,
    #[source]
    source:    Box<dyn std::error::Error + Send + Sync>,
  },
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CatalogError {
  #[error("cannot read catalog {path:?}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid catalog JSON: {0}")]
  Json(#[from] serde_json::Error),
}
