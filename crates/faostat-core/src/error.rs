//! Error types for `faostat-core`.

use thiserror::Error;

use crate::lifecycle::IngestStage;

#[derive(Debug, Error)]
pub enum Error {
  #[error("illegal stage transition: {from} -> {to}")]
  IllegalTransition { from: IngestStage, to: IngestStage },

  #[error("unknown ingest stage: {0:?}")]
  UnknownStage(String),

  #[error("unknown import status: {0:?}")]
  UnknownImportStatus(String),

  #[error("unknown re-import policy: {0:?}")]
  UnknownPolicy(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
