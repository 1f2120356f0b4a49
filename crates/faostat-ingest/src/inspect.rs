//! Column-presence report over a set of bundles, written without touching
//! the store.

use std::{
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::warn;

use crate::{
  archive::{DatasetArchive, MemberKind},
  error::ArchiveError,
  mapping::{self, CORE_FACT_COLUMNS, Headers},
};

/// Optional fact columns worth reporting on.
pub const OPTIONAL_FACT_COLUMNS: &[&str] = &["year code", "months code", "months", "unit", "note"];

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInspection {
  pub path:             PathBuf,
  /// Recognised members, by kind.
  pub members:          BTreeMap<String, String>,
  /// Normalised fact-file headers in file order.
  pub fact_columns:     Vec<String>,
  pub missing_core:     Vec<&'static str>,
  pub optional_present: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectionReport {
  pub archives: Vec<ArchiveInspection>,
  /// Archives that could not be opened, with the reason.
  pub failures: Vec<(PathBuf, String)>,
  /// How many archives carry each fact column.
  pub column_counts: BTreeMap<String, usize>,
}

/// Read the fact header of one bundle.
pub fn inspect_archive(path: &Path) -> Result<ArchiveInspection, ArchiveError> {
  let mut archive = DatasetArchive::open(path)?;
  let members = archive
    .layout()
    .map(|(kind, name)| (kind.to_string(), name.to_owned()))
    .collect();

  let headers = match archive.open_member(MemberKind::Facts)? {
    Some((name, reader)) => {
      let mut rdr = mapping::csv_reader(reader);
      let record = rdr
        .byte_headers()
        .map_err(|source| ArchiveError::Csv { member: name.clone(), source })?;
      Headers::from_record(record)
    }
    None => Headers::default(),
  };

  let fact_columns = headers.names().to_vec();
  let has = |c: &str| fact_columns.iter().any(|h| h == c);
  Ok(ArchiveInspection {
    path: path.to_path_buf(),
    members,
    missing_core: CORE_FACT_COLUMNS.iter().copied().filter(|c| !has(c)).collect(),
    optional_present: OPTIONAL_FACT_COLUMNS.iter().copied().filter(|c| has(c)).collect(),
    fact_columns,
  })
}

/// Inspect every bundle found below `dirs`.
pub fn inspect(dirs: &[PathBuf]) -> crate::Result<InspectionReport> {
  let mut report = InspectionReport::default();
  for path in crate::orchestrator::discover(dirs)? {
    match inspect_archive(&path) {
      Ok(found) => {
        for column in &found.fact_columns {
          *report.column_counts.entry(column.clone()).or_default() += 1;
        }
        report.archives.push(found);
      }
      Err(err) => {
        warn!(archive = %path.display(), error = %err, "cannot inspect archive");
        report.failures.push((path, err.to_string()));
      }
    }
  }
  Ok(report)
}

impl fmt::Display for InspectionReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for a in &self.archives {
      writeln!(f, "{}", a.path.display())?;
      let kinds: Vec<&str> = a.members.keys().map(String::as_str).collect();
      writeln!(f, "  members:  {}", kinds.join(", "))?;
      if !a.missing_core.is_empty() {
        writeln!(f, "  missing:  {}", a.missing_core.join(", "))?;
      }
      writeln!(f, "  optional: {}", a.optional_present.join(", "))?;
    }
    for (path, reason) in &self.failures {
      writeln!(f, "{}\n  error: {reason}", path.display())?;
    }

    let total = self.archives.len();
    writeln!(f, "\ncolumn presence across {total} archive(s):")?;
    for (column, count) in &self.column_counts {
      writeln!(f, "  {column:<16} {count}/{total}")?;
    }
    Ok(())
  }
}
