//! Error type for `faostat-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] faostat_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored dimension code did not have the type its kind requires.
  #[error("malformed {kind} code in store: {value}")]
  MalformedCode { kind: &'static str, value: String },

  /// The dimension kind requires the other code type.
  #[error("{kind} code {code} has the wrong type")]
  CodeType { kind: &'static str, code: String },

  #[error("import not found: {0}")]
  ImportNotFound(i64),

  #[error("import {0} is not running")]
  ImportNotRunning(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
