//! Streaming fact loading.
//!
//! CSV parsing runs on a blocking thread and hands finished batches to the
//! async writer through a bounded channel, so at most
//! [`CHANNEL_CAPACITY`] batches are buffered while one is being written.
//! Batches are committed strictly in the order they were parsed.

use std::mem;

use csv::ByteRecord;
use faostat_core::{observation::NewObservation, store::IngestStore};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
  archive::{DatasetArchive, MemberKind},
  error::{ArchiveError, LoadError, Result, RowError},
  mapping::{self, FactColumns, FactMapper, Headers},
  retry::{RetryPolicy, with_retry},
};

/// Parsed batches buffered ahead of the writer.
pub const CHANNEL_CAPACITY: usize = 2;

const PROGRESS_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct LoaderOptions {
  pub batch_size:              usize,
  pub max_skip_ratio:          f64,
  pub skip_threshold_min_rows: u64,
  pub max_reported_skips:      usize,
  pub retry:                   RetryPolicy,
}

impl Default for LoaderOptions {
  fn default() -> Self {
    Self {
      batch_size:              10_000,
      max_skip_ratio:          0.05,
      skip_threshold_min_rows: 1_000,
      max_reported_skips:      100,
      retry:                   RetryPolicy::default(),
    }
  }
}

/// Totals for one dataset load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
  pub rows_loaded:     u64,
  pub rows_skipped:    u64,
  pub batches:         u64,
  /// The first rejected rows, up to `max_reported_skips`.
  pub skipped_samples: Vec<RowError>,
}

impl LoadReport {
  pub fn rows_seen(&self) -> u64 { self.rows_loaded + self.rows_skipped }
}

// ─── Producer side ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Batch {
  rows:     Vec<NewObservation>,
  seen:     u64,
  skipped:  u64,
  rejected: Vec<RowError>,
}

/// Collects mapped rows on the parsing thread and ships them in batches.
pub struct BatchSink {
  tx:           mpsc::Sender<Batch>,
  batch_size:   usize,
  current:      Batch,
  samples_left: usize,
}

impl BatchSink {
  fn new(tx: mpsc::Sender<Batch>, batch_size: usize, max_samples: usize) -> Self {
    Self {
      tx,
      batch_size,
      current: Batch { rows: Vec::with_capacity(batch_size), ..Batch::default() },
      samples_left: max_samples,
    }
  }

  /// Add one mapped (or rejected) row. Returns `false` once the writer has
  /// stopped; the producer should then stop too.
  pub fn push(&mut self, row: std::result::Result<NewObservation, RowError>) -> bool {
    self.current.seen += 1;
    match row {
      Ok(obs) => self.current.rows.push(obs),
      Err(err) => {
        self.current.skipped += 1;
        if self.samples_left > 0 {
          self.samples_left -= 1;
          self.current.rejected.push(err);
        }
      }
    }

    // Batches close on rows seen, not rows kept, so the skip rate is
    // judged even when nearly every row is rejected.
    if self.current.seen >= self.batch_size as u64 { self.flush() } else { true }
  }

  fn flush(&mut self) -> bool {
    if self.current.seen == 0 {
      return true;
    }
    let next = Batch { rows: Vec::with_capacity(self.batch_size), ..Batch::default() };
    let batch = mem::replace(&mut self.current, next);
    self.tx.blocking_send(batch).is_ok()
  }
}

/// Parse the fact member of `archive` into `sink`.
pub fn stream_facts(
  archive: &mut DatasetArchive,
  build_mapper: impl FnOnce(FactColumns) -> FactMapper,
  sink: &mut BatchSink,
) -> std::result::Result<(), ArchiveError> {
  let path = archive.path().to_path_buf();
  let (member, reader) = archive
    .open_member(MemberKind::Facts)?
    .ok_or(ArchiveError::MissingMember { path, member: "All_Data_(Normalized).csv" })?;
  let csv_err = |source| ArchiveError::Csv { member: member.clone(), source };

  let mut rdr = mapping::csv_reader(reader);
  let headers = Headers::from_record(rdr.byte_headers().map_err(csv_err)?);
  let mapper = build_mapper(FactColumns::locate(&headers, &member)?);

  let mut record = ByteRecord::new();
  let mut line = 1u64;
  while rdr.read_byte_record(&mut record).map_err(csv_err)? {
    line += 1;
    if !sink.push(mapper.map(&record, line)) {
      break;
    }
  }
  Ok(())
}

// ─── Writer side ─────────────────────────────────────────────────────────────

pub struct FactLoader<'a, S> {
  store:   &'a S,
  options: LoaderOptions,
}

impl<'a, S: IngestStore> FactLoader<'a, S> {
  pub fn new(store: &'a S, options: LoaderOptions) -> Self { Self { store, options } }

  /// Run `produce` on a blocking thread and write every batch it emits for
  /// `dataset_code`.
  ///
  /// Rejected rows are counted and sampled. Once at least
  /// `skip_threshold_min_rows` rows were seen, a skip ratio above
  /// `max_skip_ratio` aborts the load. A load that rejected every row it
  /// saw fails regardless of size.
  pub async fn load<P>(&self, dataset_code: &str, produce: P) -> Result<LoadReport>
  where
    P: FnOnce(&mut BatchSink) -> std::result::Result<(), ArchiveError> + Send + 'static,
  {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let batch_size = self.options.batch_size.max(1);
    let max_samples = self.options.max_reported_skips;

    let producer = tokio::task::spawn_blocking(move || {
      let mut sink = BatchSink::new(tx, batch_size, max_samples);
      produce(&mut sink)?;
      sink.flush();
      Ok::<_, ArchiveError>(())
    });

    let mut report = LoadReport::default();
    let written = self.write_batches(dataset_code, &mut rx, &mut report).await;
    // Closing the channel unblocks the producer if the writer bailed out.
    drop(rx);
    let produced = producer.await?;

    written?;
    produced?;
    self.check_any_loaded(&report)?;
    info!(
      dataset = dataset_code,
      rows_loaded = report.rows_loaded,
      rows_skipped = report.rows_skipped,
      batches = report.batches,
      "facts loaded"
    );
    Ok(report)
  }

  /// Load an in-memory sequence of already mapped rows.
  pub async fn load_rows<I>(&self, dataset_code: &str, rows: I) -> Result<LoadReport>
  where
    I: IntoIterator<Item = std::result::Result<NewObservation, RowError>>,
    I::IntoIter: Send + 'static,
  {
    let rows = rows.into_iter();
    self
      .load(dataset_code, move |sink| {
        for row in rows {
          if !sink.push(row) {
            break;
          }
        }
        Ok(())
      })
      .await
  }

  async fn write_batches(
    &self,
    dataset_code: &str,
    rx: &mut mpsc::Receiver<Batch>,
    report: &mut LoadReport,
  ) -> Result<()> {
    while let Some(batch) = rx.recv().await {
      for err in &batch.rejected {
        warn!(dataset = dataset_code, line = err.line, error = %err.kind, "skipping row");
      }
      report.skipped_samples.extend(batch.rejected);
      report.rows_skipped += batch.skipped;

      if !batch.rows.is_empty() {
        let rows = batch.rows;
        let inserted = with_retry(&self.options.retry, "insert_observations", || {
          self.store.insert_observations(rows.clone())
        })
        .await?;
        report.rows_loaded += inserted;
        report.batches += 1;

        if report.batches % PROGRESS_EVERY == 0 {
          info!(
            dataset = dataset_code,
            batches = report.batches,
            rows_loaded = report.rows_loaded,
            rows_skipped = report.rows_skipped,
            "loading facts"
          );
        }
      }

      self.check_skip_rate(report)?;
    }
    Ok(())
  }

  fn check_any_loaded(&self, report: &LoadReport) -> std::result::Result<(), LoadError> {
    if report.rows_loaded > 0 || report.rows_skipped == 0 {
      return Ok(());
    }
    Err(LoadError::NothingLoaded {
      seen:  report.rows_seen(),
      first: first_sample(report),
    })
  }

  fn check_skip_rate(&self, report: &LoadReport) -> std::result::Result<(), LoadError> {
    let seen = report.rows_seen();
    if seen == 0 || seen < self.options.skip_threshold_min_rows {
      return Ok(());
    }
    let ratio = report.rows_skipped as f64 / seen as f64;
    if ratio <= self.options.max_skip_ratio {
      return Ok(());
    }
    Err(LoadError::SkipRateExceeded {
      skipped: report.rows_skipped,
      seen,
      ratio: ratio * 100.0,
      max: self.options.max_skip_ratio * 100.0,
      first: first_sample(report),
    })
  }
}

fn first_sample(report: &LoadReport) -> String {
  report.skipped_samples.first().map(ToString::to_string).unwrap_or_default()
}
