//! [`SqliteStore`], the SQLite implementation of [`IngestStore`].

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior, types::Value};
use uuid::Uuid;

use faostat_core::{
  dataset::{CompletedLoad, DatasetMetadata, ReimportPolicy},
  dimension::{DimensionCode, DimensionKind, DimensionRecord, UpsertOutcome},
  lifecycle::{ImportRecord, ImportRun, ImportStatus, IngestStage},
  observation::{NewObservation, ObservationView},
  store::IngestStore,
};

use crate::{
  Error, Result,
  encode::{
    IMPORT_COLUMNS, RawImport, decode_code, decode_count, dimension_sql,
    encode_code, encode_count, encode_dt, encode_uuid, upsert_params,
  },
  schema::SCHEMA,
};

/// How long a writer waits on a lock held by another connection before the
/// statement fails with `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Stored dataset ──────────────────────────────────────────────────────────

/// A `datasets` row including the pipeline-maintained columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDataset {
  pub metadata:       DatasetMetadata,
  /// Visible observations after the last completed load.
  pub row_count:      Option<u64>,
  pub active_load_id: i64,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A FAOSTAT store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted and every
/// clone shares the same connection thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  /// Writers wait up to `busy_timeout` for a lock held elsewhere.
  pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema(busy_timeout).await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema(DEFAULT_BUSY_TIMEOUT).await?;
    Ok(store)
  }

  async fn init_schema(&self, busy_timeout: Duration) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The lock wait configured on the connection.
  pub async fn busy_timeout(&self) -> Result<Duration> {
    let ms: u64 = self
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA busy_timeout", [], |r| r.get(0))?))
      .await?;
    Ok(Duration::from_millis(ms))
  }

  /// Current status of an import, or `None` if it does not exist.
  async fn import_status(&self, load_id: i64) -> Result<Option<ImportStatus>> {
    let status: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT status FROM imports WHERE load_id = ?1",
              rusqlite::params![load_id],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(status.map(|s| s.parse::<ImportStatus>()).transpose()?)
  }

  /// Fail with [`Error::ImportNotRunning`] unless `load_id` is running.
  async fn require_running(&self, load_id: i64) -> Result<()> {
    match self.import_status(load_id).await? {
      None => Err(Error::ImportNotFound(load_id)),
      Some(ImportStatus::Running) => Ok(()),
      Some(_) => Err(Error::ImportNotRunning(load_id)),
    }
  }

  // ── Read helpers (not part of the ingest contract) ────────────────────────

  /// Fetch the full `datasets` row for `code`.
  pub async fn get_dataset(&self, code: &str) -> Result<Option<StoredDataset>> {
    let code = code.to_owned();
    let row = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT dataset_code, dataset_name, topic, description, contact,
                      email, date_update, file_size, file_rows, file_location,
                      row_count, active_load_id
               FROM datasets WHERE dataset_code = ?1",
              rusqlite::params![code],
              |r| {
                Ok(StoredDataset {
                  metadata:       DatasetMetadata {
                    code:          r.get(0)?,
                    name:          r.get(1)?,
                    topic:         r.get(2)?,
                    description:   r.get(3)?,
                    contact:       r.get(4)?,
                    email:         r.get(5)?,
                    date_update:   r.get(6)?,
                    file_size:     r.get(7)?,
                    file_rows:     r.get(8)?,
                    file_location: r.get(9)?,
                  },
                  row_count:      r.get::<_, Option<i64>>(10)?.map(decode_count),
                  active_load_id: r.get(11)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    Ok(row)
  }

  /// Number of rows in a dimension table.
  pub async fn dimension_count(&self, kind: DimensionKind) -> Result<u64> {
    let sql = dimension_sql(kind).count;
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))
      .await?;
    Ok(decode_count(n))
  }

  /// Display name stored for a dimension code.
  pub async fn dimension_name(
    &self,
    kind: DimensionKind,
    code: DimensionCode,
  ) -> Result<Option<String>> {
    let sql = dimension_sql(kind).name;
    let value = encode_code(kind, &code)?;
    let name = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(sql, [value], |r| r.get(0)).optional()?)
      })
      .await?;
    Ok(name)
  }

  /// Raw observation rows for a dataset across every load, visible or not.
  pub async fn observation_count(&self, dataset_code: &str) -> Result<u64> {
    let code = dataset_code.to_owned();
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM faostat_data WHERE dataset_code = ?1",
          rusqlite::params![code],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(decode_count(n))
  }

  /// Rows of `faostat_data_view` for a dataset, ordered by id.
  pub async fn observation_view(
    &self,
    dataset_code: &str,
  ) -> Result<Vec<ObservationView>> {
    let code = dataset_code.to_owned();
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, dataset_code, dataset_name, area_code, area_name, m49_code,
                  item_code, item_name, element_code, element_name, year,
                  month_name, value, unit, flag, flag_description, note
           FROM faostat_data_view
           WHERE dataset_code = ?1
           ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![code], |r| {
            Ok(ObservationView {
              id:               r.get(0)?,
              dataset_code:     r.get(1)?,
              dataset_name:     r.get(2)?,
              area_code:        r.get(3)?,
              area_name:        r.get(4)?,
              m49_code:         r.get(5)?,
              item_code:        r.get(6)?,
              item_name:        r.get(7)?,
              element_code:     r.get(8)?,
              element_name:     r.get(9)?,
              year:             r.get(10)?,
              month_name:       r.get(11)?,
              value:            r.get(12)?,
              unit:             r.get(13)?,
              flag:             r.get(14)?,
              flag_description: r.get(15)?,
              note:             r.get(16)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  /// Every import of a dataset, oldest first.
  pub async fn imports_for(&self, dataset_code: &str) -> Result<Vec<ImportRecord>> {
    let code = dataset_code.to_owned();
    let raws: Vec<RawImport> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {IMPORT_COLUMNS} FROM imports WHERE dataset_code = ?1 ORDER BY load_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![code], RawImport::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawImport::into_record).collect()
  }
}

/// Upsert the metadata columns of a dataset row. Known values are never
/// replaced by NULL; the pipeline-maintained columns are left alone.
fn upsert_dataset_row(
  conn: &rusqlite::Connection,
  m: &DatasetMetadata,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO datasets (
       dataset_code, dataset_name, topic, description, contact, email,
       date_update, file_size, file_rows, file_location
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
     ON CONFLICT (dataset_code) DO UPDATE SET
       dataset_name  = COALESCE(excluded.dataset_name,  datasets.dataset_name),
       topic         = COALESCE(excluded.topic,         datasets.topic),
       description   = COALESCE(excluded.description,   datasets.description),
       contact       = COALESCE(excluded.contact,       datasets.contact),
       email         = COALESCE(excluded.email,         datasets.email),
       date_update   = COALESCE(excluded.date_update,   datasets.date_update),
       file_size     = COALESCE(excluded.file_size,     datasets.file_size),
       file_rows     = COALESCE(excluded.file_rows,     datasets.file_rows),
       file_location = COALESCE(excluded.file_location, datasets.file_location)",
    rusqlite::params![
      m.code,
      m.name,
      m.topic,
      m.description,
      m.contact,
      m.email,
      m.date_update,
      m.file_size,
      m.file_rows,
      m.file_location,
    ],
  )?;
  Ok(())
}

// ─── IngestStore impl ────────────────────────────────────────────────────────

impl IngestStore for SqliteStore {
  type Error = Error;

  // ── Dimensions ────────────────────────────────────────────────────────────

  async fn upsert_dimensions(
    &self,
    kind:         DimensionKind,
    dataset_code: String,
    records:      Vec<DimensionRecord>,
  ) -> Result<Vec<UpsertOutcome>> {
    let sql = dimension_sql(kind);
    let bound = records
      .into_iter()
      .map(|r| encode_code(kind, &r.code).map(|code| (code, r)))
      .collect::<Result<Vec<_>>>()?;

    let outcomes = self
      .conn
      .call(move |conn| {
        // IMMEDIATE takes the write lock up front, so no other writer can
        // interleave between reading the previous name and the upsert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcomes = Vec::with_capacity(bound.len());
        {
          let mut select = tx.prepare_cached(sql.select)?;
          let mut upsert = tx.prepare_cached(sql.upsert)?;

          for (code, record) in &bound {
            let previous: Option<String> = select
              .query_row([code], |r| r.get(0))
              .optional()?;

            let params = upsert_params(kind, code.clone(), record, &dataset_code);
            let changed = upsert.execute(rusqlite::params_from_iter(params))?;

            let outcome = match (previous, changed) {
              (None, _) => UpsertOutcome::Inserted,
              (Some(_), 0) => UpsertOutcome::Unchanged,
              (Some(prev), _) => UpsertOutcome::Updated {
                previous_name: (prev != record.name).then_some(prev),
              },
            };
            outcomes.push(outcome);
          }
        }
        tx.commit()?;
        Ok(outcomes)
      })
      .await?;

    Ok(outcomes)
  }

  async fn dimension_codes(&self, kind: DimensionKind) -> Result<Vec<DimensionCode>> {
    let sql = dimension_sql(kind).codes;
    let values: Vec<Value> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map([], |r| r.get::<_, Value>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    values.into_iter().map(|v| decode_code(kind, v)).collect()
  }

  // ── Dataset registry ──────────────────────────────────────────────────────

  async fn upsert_dataset(&self, metadata: DatasetMetadata) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        upsert_dataset_row(conn, &metadata)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn begin_import(
    &self,
    metadata:   DatasetMetadata,
    run_id:     Uuid,
    started_at: DateTime<Utc>,
  ) -> Result<ImportRun> {
    let code       = metadata.code.clone();
    let run_id_str = encode_uuid(run_id);
    let at_str     = encode_dt(started_at);

    let load_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upsert_dataset_row(&tx, &metadata)?;

        // Imports still marked running were interrupted.
        tx.execute(
          "UPDATE imports
           SET status = 'failed', error = 'interrupted', completed_at = ?2
           WHERE dataset_code = ?1 AND status = 'running'",
          rusqlite::params![metadata.code, at_str],
        )?;
        tx.execute(
          "DELETE FROM faostat_data
           WHERE dataset_code = ?1
             AND load_id > (SELECT active_load_id FROM datasets WHERE dataset_code = ?1)",
          rusqlite::params![metadata.code],
        )?;

        tx.execute(
          "INSERT INTO imports (dataset_code, run_id, stage, status, started_at)
           VALUES (?1, ?2, ?3, 'running', ?4)",
          rusqlite::params![
            metadata.code,
            run_id_str,
            IngestStage::Pending.as_str(),
            at_str
          ],
        )?;
        let load_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(load_id)
      })
      .await?;

    Ok(ImportRun { load_id, dataset_code: code, run_id, started_at })
  }

  async fn set_import_stage(&self, load_id: i64, stage: IngestStage) -> Result<()> {
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE imports SET stage = ?2 WHERE load_id = ?1 AND status = 'running'",
          rusqlite::params![load_id, stage.as_str()],
        )?)
      })
      .await?;

    if updated == 0 {
      self.require_running(load_id).await?;
    }
    Ok(())
  }

  async fn complete_import(&self, completed: CompletedLoad) -> Result<()> {
    self.require_running(completed.load_id).await?;

    let CompletedLoad { load_id, rows_loaded, rows_skipped, completed_at, policy } =
      completed;
    let at_str = encode_dt(completed_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let code: String = tx.query_row(
          "SELECT dataset_code FROM imports WHERE load_id = ?1",
          rusqlite::params![load_id],
          |r| r.get(0),
        )?;

        if policy == ReimportPolicy::Replace {
          tx.execute(
            "DELETE FROM faostat_data WHERE dataset_code = ?1 AND load_id != ?2",
            rusqlite::params![code, load_id],
          )?;
        }

        tx.execute(
          "UPDATE imports
           SET status = 'completed', stage = ?2, rows_loaded = ?3,
               rows_skipped = ?4, completed_at = ?5, error = NULL
           WHERE load_id = ?1",
          rusqlite::params![
            load_id,
            IngestStage::Completed.as_str(),
            encode_count(rows_loaded),
            encode_count(rows_skipped),
            at_str,
          ],
        )?;
        tx.execute(
          "UPDATE datasets
           SET active_load_id = ?2,
               row_count = (SELECT COUNT(*) FROM faostat_data
                            WHERE dataset_code = ?1 AND load_id <= ?2)
           WHERE dataset_code = ?1",
          rusqlite::params![code, load_id],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fail_import(
    &self,
    load_id: i64,
    stage:   IngestStage,
    reason:  String,
  ) -> Result<()> {
    self.require_running(load_id).await?;
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "DELETE FROM faostat_data WHERE load_id = ?1",
          rusqlite::params![load_id],
        )?;
        tx.execute(
          "UPDATE imports
           SET status = 'failed', stage = ?2, error = ?3, completed_at = ?4
           WHERE load_id = ?1",
          rusqlite::params![load_id, stage.as_str(), reason, at_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn completed_datasets(&self) -> Result<Vec<String>> {
    let codes = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT dataset_code FROM imports
           WHERE status = 'completed'
           ORDER BY dataset_code",
        )?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(codes)
  }

  async fn latest_imports(&self) -> Result<Vec<ImportRecord>> {
    let raws: Vec<RawImport> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {IMPORT_COLUMNS} FROM imports
           WHERE load_id IN (SELECT MAX(load_id) FROM imports GROUP BY dataset_code)
           ORDER BY dataset_code"
        ))?;
        let rows = stmt
          .query_map([], RawImport::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawImport::into_record).collect()
  }

  // ── Facts ─────────────────────────────────────────────────────────────────

  async fn insert_observations(&self, batch: Vec<NewObservation>) -> Result<u64> {
    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO faostat_data (
               dataset_code, load_id, area_code, item_code, element_code,
               year, year_code, month_code, month_name, value, unit, flag, note
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          )?;
          for o in &batch {
            stmt.execute(rusqlite::params![
              o.dataset_code,
              o.load_id,
              o.area_code,
              o.item_code,
              o.element_code,
              o.year,
              o.year_code,
              o.month_code,
              o.month_name,
              o.value,
              o.unit,
              o.flag,
              o.note,
            ])?;
          }
        }
        tx.commit()?;
        Ok(batch.len())
      })
      .await?;

    Ok(n as u64)
  }
}
