//! Column-presence-aware mapping from FAOSTAT CSV records to domain rows.
//!
//! Columns are always located by header name, never by position: datasets
//! differ in which optional columns they carry and in column order.

use std::{
  borrow::Cow,
  collections::{HashMap, HashSet},
  io::Read,
};

use csv::ByteRecord;
use faostat_core::{
  dimension::{DimensionCode, DimensionKind, DimensionRecord},
  observation::NewObservation,
};
use tracing::warn;

use crate::error::{ArchiveError, RowError, RowErrorKind};

// ─── Text decoding ───────────────────────────────────────────────────────────

/// Decode a raw CSV field. FAOSTAT files are mostly UTF-8, but older bundles
/// are Latin-1; any invalid UTF-8 is read as Latin-1 instead.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
  match std::str::from_utf8(bytes) {
    Ok(s) => Cow::Borrowed(s),
    Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
  }
}

fn normalize_header(raw: &[u8]) -> String {
  decode_text(raw)
    .trim_start_matches('\u{feff}')
    .trim()
    .to_ascii_lowercase()
}

/// Build a CSV reader configured the way FAOSTAT files need.
pub fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
  csv::ReaderBuilder::new()
    .flexible(true)
    .has_headers(true)
    .from_reader(reader)
}

// ─── Headers ─────────────────────────────────────────────────────────────────

/// Case-insensitive header lookup.
#[derive(Debug, Clone, Default)]
pub struct Headers {
  names: Vec<String>,
  index: HashMap<String, usize>,
}

impl Headers {
  pub fn from_record(record: &ByteRecord) -> Self {
    let names: Vec<String> = record.iter().map(normalize_header).collect();
    let mut index = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
      index.entry(name.clone()).or_insert(i);
    }
    Self { names, index }
  }

  /// Position of the first alias present.
  pub fn find(&self, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|a| self.index.get(*a).copied())
  }

  pub fn contains(&self, aliases: &[&str]) -> bool { self.find(aliases).is_some() }

  /// Normalised header names in file order.
  pub fn names(&self) -> &[String] { &self.names }
}

/// Trimmed field at `idx`; absent columns and empty cells are `None`.
fn field(record: &ByteRecord, idx: Option<usize>) -> Option<Cow<'_, str>> {
  let raw = record.get(idx?)?;
  let text = decode_text(raw);
  if text.trim().is_empty() {
    return None;
  }
  Some(match text {
    Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
    Cow::Owned(s) => Cow::Owned(s.trim().to_owned()),
  })
}

/// Standard codes are sometimes quoted with a leading apostrophe (`'004`) so
/// spreadsheets keep their leading zeros.
fn strip_quote(s: &str) -> &str { s.strip_prefix('\'').unwrap_or(s) }

fn parse_int(column: &'static str, raw: &str) -> Result<i64, RowErrorKind> {
  strip_quote(raw)
    .parse::<i64>()
    .map_err(|_| RowErrorKind::MalformedCode { column, value: raw.to_owned() })
}

// ─── Column aliases ──────────────────────────────────────────────────────────

pub const AREA_CODE: &[&str] = &["area code"];
pub const AREA_NAME: &[&str] = &["area", "area name"];
pub const M49_CODE: &[&str] = &["m49 code", "area code (m49)"];
pub const ITEM_CODE: &[&str] = &["item code"];
pub const ITEM_NAME: &[&str] = &["item", "item name"];
pub const CPC_CODE: &[&str] = &["cpc code", "item code (cpc)"];
pub const ELEMENT_CODE: &[&str] = &["element code"];
pub const ELEMENT_NAME: &[&str] = &["element", "element name"];
pub const FLAG: &[&str] = &["flag"];
pub const FLAG_DESCRIPTION: &[&str] = &["description", "flag description"];
pub const YEAR: &[&str] = &["year"];
pub const YEAR_CODE: &[&str] = &["year code"];
pub const MONTHS_CODE: &[&str] = &["months code", "month code"];
pub const MONTHS: &[&str] = &["months", "month"];
pub const VALUE: &[&str] = &["value"];
pub const UNIT: &[&str] = &["unit"];
pub const NOTE: &[&str] = &["note"];

/// Columns every normalised fact file should carry.
pub const CORE_FACT_COLUMNS: &[&str] = &[
  "area code", "area", "item code", "item", "element code", "element", "year",
  "value", "flag",
];

// ─── Dimension rows ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DimensionColumns {
  kind:     DimensionKind,
  code:     usize,
  name:     usize,
  standard: Option<usize>,
}

impl DimensionColumns {
  pub fn locate(
    kind: DimensionKind,
    headers: &Headers,
    member: &str,
  ) -> Result<Self, ArchiveError> {
    let (code, name, standard): (&[&str], &[&str], Option<&[&str]>) = match kind {
      DimensionKind::Area => (AREA_CODE, AREA_NAME, Some(M49_CODE)),
      DimensionKind::Item => (ITEM_CODE, ITEM_NAME, Some(CPC_CODE)),
      DimensionKind::Element => (ELEMENT_CODE, ELEMENT_NAME, None),
      DimensionKind::Flag => (FLAG, FLAG_DESCRIPTION, None),
    };
    let missing = |column: &'static str| ArchiveError::MissingColumn {
      member: member.to_owned(),
      column,
    };

    Ok(Self {
      kind,
      code: headers.find(code).ok_or_else(|| missing(code[0]))?,
      name: headers.find(name).ok_or_else(|| missing(name[0]))?,
      standard: standard.and_then(|aliases| headers.find(aliases)),
    })
  }

  pub fn map(&self, record: &ByteRecord) -> Result<DimensionRecord, RowErrorKind> {
    let raw_code = field(record, Some(self.code)).ok_or(RowErrorKind::MalformedCode {
      column: "code",
      value:  String::new(),
    })?;
    let code = match self.kind {
      DimensionKind::Flag => DimensionCode::Text(raw_code.into_owned()),
      _ => DimensionCode::Int(parse_int("code", &raw_code)?),
    };
    let name = field(record, Some(self.name)).map(Cow::into_owned).unwrap_or_default();
    let standard_code = field(record, self.standard).map(|s| strip_quote(&s).to_owned());

    Ok(DimensionRecord { code, name, standard_code })
  }
}

/// A fully parsed dimension CSV.
#[derive(Debug, Clone, Default)]
pub struct DimensionFile {
  pub records:   Vec<DimensionRecord>,
  /// Rows dropped because their code could not be parsed.
  pub malformed: u64,
}

/// Read every row of a dimension CSV. Unparsable rows are counted and logged,
/// not fatal.
pub fn read_dimension_file<R: Read>(
  kind: DimensionKind,
  member: &str,
  reader: R,
) -> Result<DimensionFile, ArchiveError> {
  let csv_err = |source| ArchiveError::Csv { member: member.to_owned(), source };

  let mut rdr = csv_reader(reader);
  let headers = Headers::from_record(rdr.byte_headers().map_err(csv_err)?);
  let columns = DimensionColumns::locate(kind, &headers, member)?;

  let mut file = DimensionFile::default();
  let mut record = ByteRecord::new();
  let mut line = 1u64;
  while rdr.read_byte_record(&mut record).map_err(csv_err)? {
    line += 1;
    match columns.map(&record) {
      Ok(r) => file.records.push(r),
      Err(kind_err) => {
        file.malformed += 1;
        warn!(member, line, error = %kind_err, "skipping malformed {kind} row");
      }
    }
  }
  Ok(file)
}

// ─── Dimension index ─────────────────────────────────────────────────────────

/// The codes fact rows of one dataset may reference.
///
/// `items`/`elements` are `None` when the dataset ships no such dimension
/// file; the corresponding fact columns are then stored as NULL.
#[derive(Debug, Clone, Default)]
pub struct DimensionIndex {
  pub areas:    HashSet<i64>,
  pub items:    Option<HashSet<i64>>,
  pub elements: Option<HashSet<i64>>,
  pub flags:    HashSet<String>,
}

impl DimensionIndex {
  pub fn insert(&mut self, kind: DimensionKind, code: &DimensionCode) {
    match (kind, code) {
      (DimensionKind::Area, DimensionCode::Int(c)) => {
        self.areas.insert(*c);
      }
      (DimensionKind::Item, DimensionCode::Int(c)) => {
        self.items.get_or_insert_with(HashSet::new).insert(*c);
      }
      (DimensionKind::Element, DimensionCode::Int(c)) => {
        self.elements.get_or_insert_with(HashSet::new).insert(*c);
      }
      (DimensionKind::Flag, DimensionCode::Text(c)) => {
        self.flags.insert(c.clone());
      }
      _ => {}
    }
  }

  /// Mark a dataset-owned dimension as present even if it had no rows.
  pub fn declare(&mut self, kind: DimensionKind) {
    match kind {
      DimensionKind::Item => {
        self.items.get_or_insert_with(HashSet::new);
      }
      DimensionKind::Element => {
        self.elements.get_or_insert_with(HashSet::new);
      }
      DimensionKind::Area | DimensionKind::Flag => {}
    }
  }
}

// ─── Fact rows ───────────────────────────────────────────────────────────────

/// Where each fact field lives in a particular file. Only `year` is required.
#[derive(Debug, Clone, Copy)]
pub struct FactColumns {
  area_code:    Option<usize>,
  item_code:    Option<usize>,
  element_code: Option<usize>,
  year:         usize,
  year_code:    Option<usize>,
  months_code:  Option<usize>,
  months:       Option<usize>,
  value:        Option<usize>,
  unit:         Option<usize>,
  flag:         Option<usize>,
  note:         Option<usize>,
}

impl FactColumns {
  pub fn locate(headers: &Headers, member: &str) -> Result<Self, ArchiveError> {
    let year = headers.find(YEAR).ok_or_else(|| ArchiveError::MissingColumn {
      member: member.to_owned(),
      column: "Year",
    })?;
    if !headers.contains(VALUE) {
      return Err(ArchiveError::MissingColumn { member: member.to_owned(), column: "Value" });
    }

    Ok(Self {
      area_code: headers.find(AREA_CODE),
      item_code: headers.find(ITEM_CODE),
      element_code: headers.find(ELEMENT_CODE),
      year,
      year_code: headers.find(YEAR_CODE),
      months_code: headers.find(MONTHS_CODE),
      months: headers.find(MONTHS),
      value: headers.find(VALUE),
      unit: headers.find(UNIT),
      flag: headers.find(FLAG),
      note: headers.find(NOTE),
    })
  }
}

/// Maps fact records of one dataset import to observations.
#[derive(Debug, Clone)]
pub struct FactMapper {
  columns:      FactColumns,
  dataset_code: String,
  load_id:      i64,
  index:        DimensionIndex,
}

impl FactMapper {
  pub fn new(
    columns: FactColumns,
    dataset_code: impl Into<String>,
    load_id: i64,
    index: DimensionIndex,
  ) -> Self {
    Self { columns, dataset_code: dataset_code.into(), load_id, index }
  }

  /// Map one record; `line` is only used for error reporting.
  pub fn map(&self, record: &ByteRecord, line: u64) -> Result<NewObservation, RowError> {
    self
      .map_inner(record)
      .map_err(|kind| RowError { line, kind })
  }

  fn map_inner(&self, record: &ByteRecord) -> Result<NewObservation, RowErrorKind> {
    let c = &self.columns;

    let raw_year = field(record, Some(c.year)).ok_or(RowErrorKind::MissingYear)?;
    let year = parse_year(&raw_year)?;

    let area_code = self.resolve_int(
      DimensionKind::Area,
      "Area Code",
      field(record, c.area_code),
      Some(&self.index.areas),
    )?;
    let item_code = self.resolve_int(
      DimensionKind::Item,
      "Item Code",
      field(record, c.item_code),
      self.index.items.as_ref(),
    )?;
    let element_code = self.resolve_int(
      DimensionKind::Element,
      "Element Code",
      field(record, c.element_code),
      self.index.elements.as_ref(),
    )?;

    let flag = match field(record, c.flag) {
      None => None,
      Some(f) if self.index.flags.contains(&*f) => Some(f.into_owned()),
      Some(f) => {
        return Err(RowErrorKind::UnresolvedCode {
          dimension: DimensionKind::Flag,
          code:      f.into_owned(),
        });
      }
    };

    let month_code = field(record, c.months_code)
      .map(|m| parse_int("Months Code", &m))
      .transpose()?;

    let year_code = field(record, c.year_code)
      .map(Cow::into_owned)
      .or_else(|| Some(raw_year.into_owned()));

    Ok(NewObservation {
      dataset_code: self.dataset_code.clone(),
      load_id: self.load_id,
      area_code,
      item_code,
      element_code,
      year,
      year_code,
      month_code,
      month_name: field(record, c.months).map(Cow::into_owned),
      value: field(record, c.value).and_then(|v| parse_value(&v)),
      unit: field(record, c.unit).map(Cow::into_owned),
      flag,
      note: field(record, c.note).map(Cow::into_owned),
    })
  }

  /// `known = None` means the dataset has no such dimension: the code is
  /// dropped rather than checked.
  fn resolve_int(
    &self,
    dimension: DimensionKind,
    column: &'static str,
    raw: Option<Cow<'_, str>>,
    known: Option<&HashSet<i64>>,
  ) -> Result<Option<i64>, RowErrorKind> {
    let (Some(raw), Some(known)) = (raw, known) else {
      return Ok(None);
    };
    let code = parse_int(column, &raw)?;
    if known.contains(&code) {
      Ok(Some(code))
    } else {
      Err(RowErrorKind::UnresolvedCode { dimension, code: code.to_string() })
    }
  }
}

/// `"2020"`, or a range such as `"2019-2021"` which maps to its first year.
fn parse_year(raw: &str) -> Result<i32, RowErrorKind> {
  let unsigned = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
  let first = match raw.split_once('-') {
    Some((start, end)) if unsigned(start.trim()) && unsigned(end.trim()) => start.trim(),
    Some(_) => return Err(RowErrorKind::MalformedYear(raw.to_owned())),
    None => raw.trim(),
  };
  if !unsigned(first) {
    return Err(RowErrorKind::MalformedYear(raw.to_owned()));
  }
  first.parse::<i32>().map_err(|_| RowErrorKind::MalformedYear(raw.to_owned()))
}

/// Non-numeric or empty values are "not reported", stored as NULL.
fn parse_value(raw: &str) -> Option<f64> {
  raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
