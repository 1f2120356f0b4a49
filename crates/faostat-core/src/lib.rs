//! Core types and trait definitions for the FAOSTAT ingestion pipeline.
//!
//! This crate is deliberately free of file-format and database dependencies.
//! The store backend and the ingestion pipeline both depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod dataset;
pub mod dimension;
pub mod error;
pub mod lifecycle;
pub mod observation;
pub mod store;

pub use error::{Error, Result};
