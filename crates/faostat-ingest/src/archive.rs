//! Per-dataset zip bundles.
//!
//! A FAOSTAT bulk download is one zip per dataset holding the normalised
//! fact CSV and a handful of code lists. Members are decompressed on demand;
//! nothing is extracted to disk.

use std::{
  collections::BTreeMap,
  fmt,
  fs::File,
  io::{BufReader, Read},
  path::{Path, PathBuf},
};

use faostat_core::dimension::DimensionKind;
use zip::ZipArchive;

use crate::{
  error::ArchiveError,
  mapping::{self, DimensionFile},
};

/// What a member file holds, judged by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberKind {
  Facts,
  Areas,
  Items,
  Elements,
  Flags,
}

impl MemberKind {
  const SUFFIXES: [(&'static str, MemberKind); 5] = [
    ("all_data_(normalized).csv", MemberKind::Facts),
    ("areacodes.csv", MemberKind::Areas),
    ("itemcodes.csv", MemberKind::Items),
    ("elements.csv", MemberKind::Elements),
    ("flags.csv", MemberKind::Flags),
  ];

  /// Classify a member by file-name suffix; unrelated files are `None`.
  pub fn classify(name: &str) -> Option<Self> {
    let lower = name.to_ascii_lowercase();
    Self::SUFFIXES
      .iter()
      .find(|(suffix, _)| lower.ends_with(suffix))
      .map(|(_, kind)| *kind)
  }

  pub fn for_dimension(kind: DimensionKind) -> Self {
    match kind {
      DimensionKind::Area => Self::Areas,
      DimensionKind::Item => Self::Items,
      DimensionKind::Element => Self::Elements,
      DimensionKind::Flag => Self::Flags,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Facts => "facts",
      Self::Areas => "areas",
      Self::Items => "items",
      Self::Elements => "elements",
      Self::Flags => "flags",
    }
  }
}

impl fmt::Display for MemberKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An opened dataset bundle.
pub struct DatasetArchive {
  path:   PathBuf,
  zip:    ZipArchive<BufReader<File>>,
  /// Member name for each recognised kind; the first match wins.
  layout: BTreeMap<MemberKind, String>,
}

impl fmt::Debug for DatasetArchive {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DatasetArchive")
      .field("path", &self.path)
      .field("layout", &self.layout)
      .finish_non_exhaustive()
  }
}

impl DatasetArchive {
  /// Open a bundle and index its members. Fails if the file is not a zip
  /// or carries no fact CSV.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
    let path = path.as_ref().to_path_buf();
    let file =
      File::open(&path).map_err(|source| ArchiveError::Io { path: path.clone(), source })?;
    let zip = ZipArchive::new(BufReader::new(file))
      .map_err(|source| ArchiveError::Zip { path: path.clone(), source })?;

    let mut names: Vec<&str> = zip.file_names().collect();
    names.sort_unstable();
    let mut layout = BTreeMap::new();
    for name in names {
      if let Some(kind) = MemberKind::classify(name) {
        layout.entry(kind).or_insert_with(|| name.to_owned());
      }
    }

    if !layout.contains_key(&MemberKind::Facts) {
      return Err(ArchiveError::MissingMember { path, member: "All_Data_(Normalized).csv" });
    }

    Ok(Self { path, zip, layout })
  }

  pub fn path(&self) -> &Path { &self.path }

  pub fn has(&self, kind: MemberKind) -> bool { self.layout.contains_key(&kind) }

  /// Recognised members in classification order.
  pub fn layout(&self) -> impl Iterator<Item = (MemberKind, &str)> + '_ {
    self.layout.iter().map(|(k, n)| (*k, n.as_str()))
  }

  /// Decompressing reader over one member, or `None` if the bundle has no
  /// such member.
  pub fn open_member(
    &mut self,
    kind: MemberKind,
  ) -> Result<Option<(String, impl Read + '_)>, ArchiveError> {
    let Some(name) = self.layout.get(&kind).cloned() else {
      return Ok(None);
    };
    let reader = self
      .zip
      .by_name(&name)
      .map_err(|source| ArchiveError::Zip { path: self.path.clone(), source })?;
    Ok(Some((name, reader)))
  }

  /// Parse the code list for `kind`, if the bundle has one.
  pub fn read_dimension(
    &mut self,
    kind: DimensionKind,
  ) -> Result<Option<DimensionFile>, ArchiveError> {
    match self.open_member(MemberKind::for_dimension(kind))? {
      Some((name, reader)) => mapping::read_dimension_file(kind, &name, reader).map(Some),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::io::Write as _;

  use zip::write::SimpleFileOptions;

  use super::*;

  /// Write a zip holding `members` into `dir` and return its path.
  pub(crate) fn write_zip(dir: &Path, file_name: &str, members: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(file_name);
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    for (name, body) in members {
      zip.start_file(*name, SimpleFileOptions::default()).unwrap();
      zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
  }

  #[test]
  fn members_are_classified_by_suffix() {
    assert_eq!(
      MemberKind::classify("Production_Crops_Livestock_E_All_Data_(Normalized).csv"),
      Some(MemberKind::Facts)
    );
    assert_eq!(
      MemberKind::classify("Production_Crops_Livestock_E_AreaCodes.csv"),
      Some(MemberKind::Areas)
    );
    assert_eq!(MemberKind::classify("x_E_Flags.csv"), Some(MemberKind::Flags));
    assert_eq!(MemberKind::classify("readme.txt"), None);
  }

  #[test]
  fn open_indexes_present_members() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(
      dir.path(),
      "Env_E_All_Data_(Normalized).zip",
      &[
        ("Env_E_All_Data_(Normalized).csv", "Area Code,Year,Value\n"),
        ("Env_E_AreaCodes.csv", "Area Code,Area\n4,Afghanistan\n"),
        ("Env_E_Flags.csv", "Flag,Description\n"),
        ("Env_E_Symboles.csv", "ignored"),
      ],
    );

    let mut archive = DatasetArchive::open(&path).unwrap();
    assert!(archive.has(MemberKind::Facts));
    assert!(archive.has(MemberKind::Areas));
    assert!(!archive.has(MemberKind::Items));

    let areas = archive.read_dimension(DimensionKind::Area).unwrap().unwrap();
    assert_eq!(areas.records.len(), 1);
    assert!(archive.read_dimension(DimensionKind::Item).unwrap().is_none());

    let kinds: Vec<MemberKind> = archive.layout().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![MemberKind::Facts, MemberKind::Areas, MemberKind::Flags]);
  }

  #[test]
  fn bundle_without_facts_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(dir.path(), "x.zip", &[("x_E_AreaCodes.csv", "Area Code,Area\n")]);
    let err = DatasetArchive::open(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::MissingMember { .. }));
  }

  #[test]
  fn corrupt_bundle_is_an_archive_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad_E_All_Data_(Normalized).zip");
    std::fs::write(&path, b"this is not a zip").unwrap();
    let err = DatasetArchive::open(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::Zip { .. }));
  }
}
