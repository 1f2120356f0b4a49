//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Utc;
use faostat_core::{
  dataset::{CompletedLoad, DatasetMetadata, ReimportPolicy},
  dimension::{DimensionCode, DimensionKind, DimensionRecord, UpsertOutcome},
  lifecycle::{ImportStatus, IngestStage},
  observation::NewObservation,
  store::IngestStore,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn area(code: i64, name: &str) -> DimensionRecord {
  DimensionRecord::new(DimensionCode::Int(code), name)
}

fn flag(code: &str, description: &str) -> DimensionRecord {
  DimensionRecord::new(DimensionCode::Text(code.into()), description)
}

fn observation(load_id: i64, area_code: i64, year: i32) -> NewObservation {
  NewObservation {
    dataset_code: "QCL".into(),
    load_id,
    area_code: Some(area_code),
    item_code: None,
    element_code: None,
    year,
    year_code: Some(year.to_string()),
    month_code: None,
    month_name: None,
    value: Some(1000.0),
    unit: Some("t".into()),
    flag: None,
    note: None,
  }
}

async fn begin(s: &SqliteStore) -> i64 {
  s.begin_import(DatasetMetadata::new("QCL"), Uuid::new_v4(), Utc::now())
    .await
    .unwrap()
    .load_id
}

async fn complete(s: &SqliteStore, load_id: i64, rows: u64, policy: ReimportPolicy) {
  s.complete_import(CompletedLoad {
    load_id,
    rows_loaded: rows,
    rows_skipped: 0,
    completed_at: Utc::now(),
    policy,
  })
  .await
  .unwrap();
}

// ─── Dimensions ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_inserts_new_rows() {
  let s = store().await;
  let outcomes = s
    .upsert_dimensions(
      DimensionKind::Area,
      "QCL".into(),
      vec![area(4, "Afghanistan"), area(8, "Albania")],
    )
    .await
    .unwrap();

  assert_eq!(outcomes, vec![UpsertOutcome::Inserted, UpsertOutcome::Inserted]);
  assert_eq!(s.dimension_count(DimensionKind::Area).await.unwrap(), 2);
}

#[tokio::test]
async fn identical_upsert_is_unchanged() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();

  let second = s
    .upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();

  assert_eq!(second, vec![UpsertOutcome::Unchanged]);
  assert_eq!(s.dimension_count(DimensionKind::Area).await.unwrap(), 1);
}

#[tokio::test]
async fn renamed_code_is_overwritten_and_reports_previous_name() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "A")])
    .await
    .unwrap();

  let outcomes = s
    .upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "B")])
    .await
    .unwrap();

  assert_eq!(outcomes, vec![UpsertOutcome::Updated { previous_name: Some("A".into()) }]);
  assert_eq!(s.dimension_count(DimensionKind::Area).await.unwrap(), 1);
  assert_eq!(
    s.dimension_name(DimensionKind::Area, DimensionCode::Int(4)).await.unwrap().as_deref(),
    Some("B"),
  );
}

#[tokio::test]
async fn standard_code_change_is_an_update_without_rename() {
  let s = store().await;
  s.upsert_dimensions(
    DimensionKind::Area,
    "QCL".into(),
    vec![area(4, "Afghanistan").with_standard_code("004")],
  )
  .await
  .unwrap();

  let outcomes = s
    .upsert_dimensions(
      DimensionKind::Area,
      "QCL".into(),
      vec![area(4, "Afghanistan").with_standard_code("4")],
    )
    .await
    .unwrap();

  assert_eq!(outcomes, vec![UpsertOutcome::Updated { previous_name: None }]);
}

#[tokio::test]
async fn items_track_owning_dataset() {
  let s = store().await;
  s.upsert_dataset(DatasetMetadata::new("QCL")).await.unwrap();
  s.upsert_dataset(DatasetMetadata::new("TCL")).await.unwrap();

  let wheat = DimensionRecord::new(DimensionCode::Int(15), "Wheat");
  s.upsert_dimensions(DimensionKind::Item, "QCL".into(), vec![wheat.clone()])
    .await
    .unwrap();
  let outcomes = s
    .upsert_dimensions(DimensionKind::Item, "TCL".into(), vec![wheat])
    .await
    .unwrap();

  assert_eq!(outcomes, vec![UpsertOutcome::Updated { previous_name: None }]);
  assert_eq!(s.dimension_count(DimensionKind::Item).await.unwrap(), 1);
}

#[tokio::test]
async fn flag_codes_are_text() {
  let s = store().await;
  s.upsert_dimensions(
    DimensionKind::Flag,
    "QCL".into(),
    vec![flag("A", "Official figure"), flag("E", "Estimated value")],
  )
  .await
  .unwrap();

  let codes = s.dimension_codes(DimensionKind::Flag).await.unwrap();
  assert_eq!(
    codes,
    vec![DimensionCode::Text("A".into()), DimensionCode::Text("E".into())]
  );

  let err = s
    .upsert_dimensions(DimensionKind::Flag, "QCL".into(), vec![area(1, "wrong")])
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::CodeType { .. }));
}

// ─── Dataset registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_dataset_never_erases_known_fields() {
  let s = store().await;
  s.upsert_dataset(DatasetMetadata {
    name: Some("Crops and livestock products".into()),
    ..DatasetMetadata::new("QCL")
  })
  .await
  .unwrap();
  s.upsert_dataset(DatasetMetadata {
    file_location: Some("/data/qcl.zip".into()),
    ..DatasetMetadata::new("QCL")
  })
  .await
  .unwrap();

  let ds = s.get_dataset("QCL").await.unwrap().unwrap();
  assert_eq!(ds.metadata.name.as_deref(), Some("Crops and livestock products"));
  assert_eq!(ds.metadata.file_location.as_deref(), Some("/data/qcl.zip"));
  assert_eq!(ds.active_load_id, 0);
}

#[tokio::test]
async fn begin_import_opens_running_record() {
  let s = store().await;
  let load_id = begin(&s).await;

  s.set_import_stage(load_id, IngestStage::Extracting).await.unwrap();

  let imports = s.latest_imports().await.unwrap();
  assert_eq!(imports.len(), 1);
  assert_eq!(imports[0].load_id, load_id);
  assert_eq!(imports[0].status, ImportStatus::Running);
  assert_eq!(imports[0].stage, IngestStage::Extracting);
  assert!(s.completed_datasets().await.unwrap().is_empty());
}

#[tokio::test]
async fn running_rows_are_hidden_from_the_view() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();
  let load_id = begin(&s).await;

  s.insert_observations(vec![observation(load_id, 4, 2020)]).await.unwrap();
  assert_eq!(s.observation_count("QCL").await.unwrap(), 1);
  assert!(s.observation_view("QCL").await.unwrap().is_empty());

  complete(&s, load_id, 1, ReimportPolicy::Replace).await;
  let view = s.observation_view("QCL").await.unwrap();
  assert_eq!(view.len(), 1);
  assert_eq!(view[0].area_name.as_deref(), Some("Afghanistan"));

  let ds = s.get_dataset("QCL").await.unwrap().unwrap();
  assert_eq!(ds.row_count, Some(1));
  assert_eq!(ds.active_load_id, load_id);
  assert_eq!(s.completed_datasets().await.unwrap(), vec!["QCL".to_string()]);
}

#[tokio::test]
async fn replace_policy_drops_earlier_loads() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();

  for _ in 0..2 {
    let load_id = begin(&s).await;
    s.insert_observations(vec![observation(load_id, 4, 2020)]).await.unwrap();
    complete(&s, load_id, 1, ReimportPolicy::Replace).await;
  }

  assert_eq!(s.observation_count("QCL").await.unwrap(), 1);
  assert_eq!(s.observation_view("QCL").await.unwrap().len(), 1);
}

#[tokio::test]
async fn append_policy_keeps_earlier_loads() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();

  for year in [2020, 2021] {
    let load_id = begin(&s).await;
    s.insert_observations(vec![observation(load_id, 4, year)]).await.unwrap();
    complete(&s, load_id, 1, ReimportPolicy::Append).await;
  }

  assert_eq!(s.observation_view("QCL").await.unwrap().len(), 2);
  let ds = s.get_dataset("QCL").await.unwrap().unwrap();
  assert_eq!(ds.row_count, Some(2));
}

#[tokio::test]
async fn failed_import_discards_its_rows() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();
  let load_id = begin(&s).await;
  s.insert_observations(vec![observation(load_id, 4, 2020)]).await.unwrap();

  s.fail_import(load_id, IngestStage::LoadingFacts, "too many skips".into())
    .await
    .unwrap();

  assert_eq!(s.observation_count("QCL").await.unwrap(), 0);
  let imports = s.imports_for("QCL").await.unwrap();
  assert_eq!(imports[0].status, ImportStatus::Failed);
  assert_eq!(imports[0].stage, IngestStage::LoadingFacts);
  assert_eq!(imports[0].error.as_deref(), Some("too many skips"));

  let err = s
    .complete_import(CompletedLoad {
      load_id,
      rows_loaded: 1,
      rows_skipped: 0,
      completed_at: Utc::now(),
      policy: ReimportPolicy::Replace,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::ImportNotRunning(_)));
}

#[tokio::test]
async fn new_import_cleans_up_interrupted_one() {
  let s = store().await;
  s.upsert_dimensions(DimensionKind::Area, "QCL".into(), vec![area(4, "Afghanistan")])
    .await
    .unwrap();
  let crashed = begin(&s).await;
  s.insert_observations(vec![observation(crashed, 4, 2020)]).await.unwrap();

  let next = begin(&s).await;
  assert!(next > crashed);
  assert_eq!(s.observation_count("QCL").await.unwrap(), 0);

  let imports = s.imports_for("QCL").await.unwrap();
  assert_eq!(imports[0].status, ImportStatus::Failed);
  assert_eq!(imports[0].error.as_deref(), Some("interrupted"));
  assert_eq!(imports[1].status, ImportStatus::Running);
}

// ─── Referential integrity ───────────────────────────────────────────────────

#[tokio::test]
async fn unknown_area_violates_foreign_key() {
  let s = store().await;
  let load_id = begin(&s).await;

  let err = s
    .insert_observations(vec![observation(load_id, 999, 2020)])
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Database(_)));
  assert_eq!(s.observation_count("QCL").await.unwrap(), 0);
}

#[tokio::test]
async fn stage_update_on_unknown_import_errors() {
  let s = store().await;
  let err = s
    .set_import_stage(42, IngestStage::Extracting)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::ImportNotFound(42)));
}

// ─── Connection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_applies_the_requested_busy_timeout() {
  let dir = tempfile::tempdir().unwrap();
  let s = SqliteStore::open(dir.path().join("faostat.db"), std::time::Duration::from_millis(1500))
    .await
    .unwrap();
  assert_eq!(s.busy_timeout().await.unwrap(), std::time::Duration::from_millis(1500));

  let mem = store().await;
  assert_eq!(mem.busy_timeout().await.unwrap(), crate::DEFAULT_BUSY_TIMEOUT);
}
