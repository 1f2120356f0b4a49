//! Import configuration, deserialised from a TOML file and `FAOSTAT_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use faostat_core::dataset::ReimportPolicy;
use serde::Deserialize;

use crate::{loader::LoaderOptions, retry::RetryPolicy};

/// Everything the orchestrator needs to run an import.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
  /// SQLite database file.
  pub store_path:              PathBuf,
  /// Directories searched recursively for `*_(Normalized).zip` bundles.
  pub source_dirs:             Vec<PathBuf>,
  /// FAOSTAT bulk-download catalog (`datasets_E.json`).
  pub catalog_path:            Option<PathBuf>,
  pub batch_size:              usize,
  /// If non-empty, only these dataset codes are imported.
  pub include:                 Vec<String>,
  /// Dataset codes never imported.
  pub exclude:                 Vec<String>,
  pub reimport_policy:         ReimportPolicy,
  /// Fraction of rejected fact rows above which a dataset fails.
  pub max_skip_ratio:          f64,
  /// The skip ratio is only judged once this many rows were seen.
  pub skip_threshold_min_rows: u64,
  /// Rejected rows kept (and logged) per dataset.
  pub max_reported_skips:      usize,
  pub store_timeout_secs:      u64,
  pub max_store_retries:       u32,
  pub retry_backoff_ms:        u64,
  /// Datasets processed concurrently.
  pub workers:                 usize,
}

impl Default for ImportConfig {
  fn default() -> Self {
    Self {
      store_path:              PathBuf::from("faostat.db"),
      source_dirs:             vec![PathBuf::from(".")],
      catalog_path:            None,
      batch_size:              10_000,
      include:                 Vec::new(),
      exclude:                 Vec::new(),
      reimport_policy:         ReimportPolicy::default(),
      max_skip_ratio:          0.05,
      skip_threshold_min_rows: 1_000,
      max_reported_skips:      100,
      store_timeout_secs:      300,
      max_store_retries:       3,
      retry_backoff_ms:        500,
      workers:                 1,
    }
  }
}

impl ImportConfig {
  /// Layer an optional config file under `FAOSTAT_*` environment variables.
  ///
  /// Lists are comma-separated in the environment, e.g.
  /// `FAOSTAT_SOURCE_DIRS=/data/a,/data/b`.
  pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
      builder = builder.add_source(config::File::from(path).required(true));
    }
    let settings = builder
      .add_source(
        config::Environment::with_prefix("FAOSTAT")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("source_dirs")
          .with_list_parse_key("include")
          .with_list_parse_key("exclude"),
      )
      .build()?;

    let cfg: Self = settings.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> Result<(), config::ConfigError> {
    if self.batch_size == 0 {
      return Err(config::ConfigError::Message("batch_size must be > 0".into()));
    }
    if self.workers == 0 {
      return Err(config::ConfigError::Message("workers must be > 0".into()));
    }
    if !(0.0..=1.0).contains(&self.max_skip_ratio) {
      return Err(config::ConfigError::Message(
        "max_skip_ratio must be between 0 and 1".into(),
      ));
    }
    Ok(())
  }

  /// Whether the include/exclude filter admits `code`.
  pub fn accepts(&self, code: &str) -> bool {
    let listed = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(code));
    (self.include.is_empty() || listed(&self.include)) && !listed(&self.exclude)
  }

  pub fn store_timeout(&self) -> Duration { Duration::from_secs(self.store_timeout_secs) }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_store_retries,
      backoff:     Duration::from_millis(self.retry_backoff_ms),
      timeout:     self.store_timeout(),
    }
  }

  pub fn loader_options(&self) -> LoaderOptions {
    LoaderOptions {
      batch_size:              self.batch_size,
      max_skip_ratio:          self.max_skip_ratio,
      skip_threshold_min_rows: self.skip_threshold_min_rows,
      max_reported_skips:      self.max_reported_skips,
      retry:                   self.retry_policy(),
    }
  }
}
