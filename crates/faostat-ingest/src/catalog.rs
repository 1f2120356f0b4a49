//! The FAOSTAT bulk-download catalog (`datasets_E.json`).
//!
//! The catalog lists every published dataset with its metadata and the URL
//! of its bundle. It is the only place archive file names are tied to
//! dataset codes.

use std::path::{Path, PathBuf};

use faostat_core::dataset::DatasetMetadata;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::CatalogError;

/// Suffix FAOSTAT appends to every normalised bundle name.
pub const BUNDLE_SUFFIX: &str = "_E_All_Data_(Normalized).zip";

/// Length of codes derived from file names when the catalog has no match.
const FALLBACK_CODE_LEN: usize = 10;

#[derive(Debug, Deserialize)]
struct CatalogFile {
  #[serde(rename = "Datasets")]
  datasets: CatalogDatasets,
}

#[derive(Debug, Deserialize)]
struct CatalogDatasets {
  #[serde(rename = "Dataset", default)]
  dataset: Vec<CatalogEntry>,
}

/// One catalog entry, as published.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogEntry {
  pub dataset_code:        String,
  #[serde(default)]
  pub dataset_name:        Option<String>,
  #[serde(default)]
  pub topic:               Option<String>,
  #[serde(default)]
  pub dataset_description: Option<String>,
  #[serde(default)]
  pub contact:             Option<String>,
  #[serde(default)]
  pub email:               Option<String>,
  #[serde(default)]
  pub date_update:         Option<String>,
  #[serde(default, deserialize_with = "string_or_number")]
  pub file_size:           Option<String>,
  #[serde(default, deserialize_with = "number_or_string")]
  pub file_rows:           Option<i64>,
  #[serde(default)]
  pub file_location:       Option<String>,
}

impl CatalogEntry {
  pub fn metadata(&self) -> DatasetMetadata {
    DatasetMetadata {
      code:          self.dataset_code.clone(),
      name:          self.dataset_name.clone(),
      topic:         self.topic.clone(),
      description:   self.dataset_description.clone(),
      contact:       self.contact.clone(),
      email:         self.email.clone(),
      date_update:   self.date_update.clone(),
      file_size:     self.file_size.clone(),
      file_rows:     self.file_rows,
      file_location: self.file_location.clone(),
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
  Int(i64),
  Float(f64),
  Text(String),
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
  Ok(Option::<Loose>::deserialize(d)?.map(|v| match v {
    Loose::Int(i) => i.to_string(),
    Loose::Float(f) => f.to_string(),
    Loose::Text(s) => s,
  }))
}

fn number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
  Ok(Option::<Loose>::deserialize(d)?.and_then(|v| match v {
    Loose::Int(i) => Some(i),
    Loose::Float(f) => Some(f as i64),
    Loose::Text(s) => s.trim().replace(',', "").parse().ok(),
  }))
}

/// The parsed catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  entries: Vec<CatalogEntry>,
}

impl Catalog {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
      .map_err(|source| CatalogError::Io { path: PathBuf::from(path), source })?;
    Self::from_slice(&bytes)
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
    let file: CatalogFile = serde_json::from_slice(bytes)?;
    Ok(Self { entries: file.datasets.dataset })
  }

  pub fn entries(&self) -> &[CatalogEntry] { &self.entries }

  pub fn get(&self, code: &str) -> Option<&CatalogEntry> {
    self.entries.iter().find(|e| e.dataset_code.eq_ignore_ascii_case(code))
  }

  /// The entry whose published bundle is `archive`.
  ///
  /// An exact file-name match on `FileLocation` wins; otherwise the first
  /// entry whose location mentions the bundle's base name.
  pub fn find_for_archive(&self, archive: &Path) -> Option<&CatalogEntry> {
    let file_name = archive.file_name()?.to_str()?;
    let base = bundle_base_name(file_name);

    let location_file = |e: &&CatalogEntry| {
      e.file_location
        .as_deref()
        .and_then(|l| l.rsplit('/').next())
        .is_some_and(|l| l.eq_ignore_ascii_case(file_name))
    };
    self.entries.iter().find(location_file).or_else(|| {
      self.entries.iter().find(|e| {
        e.file_location.as_deref().is_some_and(|l| {
          l.contains(base) || l.ends_with(&format!("{base}.zip"))
        })
      })
    })
  }
}

/// `Production_Crops_Livestock_E_All_Data_(Normalized).zip` →
/// `Production_Crops_Livestock`.
pub fn bundle_base_name(file_name: &str) -> &str {
  file_name
    .strip_suffix(BUNDLE_SUFFIX)
    .or_else(|| file_name.strip_suffix(".zip"))
    .unwrap_or(file_name)
}

/// Dataset code for an archive: the catalog's code when it lists the bundle,
/// otherwise a prefix of the file name.
pub fn resolve_code(catalog: Option<&Catalog>, archive: &Path) -> String {
  if let Some(entry) = catalog.and_then(|c| c.find_for_archive(archive)) {
    return entry.dataset_code.clone();
  }
  let file_name = archive
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let code: String = bundle_base_name(&file_name).chars().take(FALLBACK_CODE_LEN).collect();
  warn!(archive = %archive.display(), code = %code, "archive not in catalog; using file-name prefix");
  code
}
