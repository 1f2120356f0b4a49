//! Bulk ingestion of FAOSTAT dataset bundles into a relational store.
//!
//! Each bundle is opened with [`archive::DatasetArchive`], its code lists are
//! merged into the shared dimension tables by [`reconcile::Reconciler`], and
//! its fact CSV is streamed into the store by [`loader::FactLoader`].
//! [`orchestrator::Orchestrator`] sequences this for every bundle found and
//! records progress through [`registrar::Registrar`].
//!
//! # Running an import
//!
//! ```rust,ignore
//! let store = Arc::new(SqliteStore::open("faostat.db", DEFAULT_BUSY_TIMEOUT).await?);
//! let summary = Orchestrator::new(store, ImportConfig::load(None)?).run().await?;
//! println!("{summary}");
//! ```

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod inspect;
pub mod loader;
pub mod mapping;
pub mod orchestrator;
pub mod reconcile;
pub mod registrar;
pub mod retry;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunSummary};

#[cfg(test)]
mod tests;
