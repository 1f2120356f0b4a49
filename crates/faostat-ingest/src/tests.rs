//! End-to-end runs of the orchestrator over bundles written to a temp dir.

use std::{path::Path, sync::Arc};

use faostat_core::{
  dataset::ReimportPolicy,
  dimension::DimensionKind,
  lifecycle::{DatasetStatus, ImportStatus, IngestStage},
  store::IngestStore,
};
use faostat_store_sqlite::SqliteStore;
use tempfile::TempDir;

use crate::{
  ImportConfig, Orchestrator,
  archive::tests::write_zip,
  catalog::Catalog,
};

const FACT_HEADER: &str = "Area Code,Area Code (M49),Area,Item Code,Item Code (CPC),Item,\
                           Element Code,Element,Year Code,Year,Unit,Value,Flag,Note";

const AREAS: &str = "Area Code,M49 Code,Area\n4,'004,Afghanistan\n8,'008,Albania\n";
const FLAGS: &str = "Flag,Description\nA,Official\nE,Estimated value\n";

/// A bundle with every member FAOSTAT ships.
fn full_bundle(dir: &Path, code: &str, fact_rows: &[&str]) {
  let facts = format!("{FACT_HEADER}\n{}\n", fact_rows.join("\n"));
  let names = [
    format!("{code}_E_All_Data_(Normalized).csv"),
    format!("{code}_E_AreaCodes.csv"),
    format!("{code}_E_ItemCodes.csv"),
    format!("{code}_E_Elements.csv"),
    format!("{code}_E_Flags.csv"),
  ];
  let bodies = [
    facts.as_str(),
    AREAS,
    "Item Code,CPC Code,Item\n15,'0111,Wheat\n",
    "Element Code,Element\n5510,Production\n",
    FLAGS,
  ];
  let members: Vec<(&str, &str)> =
    names.iter().map(String::as_str).zip(bodies).collect();
  write_zip(dir, &format!("{code}_E_All_Data_(Normalized).zip"), &members);
}

const WHEAT_2020: &str = "4,'004,Afghanistan,15,'0111,Wheat,5510,Production,2020,2020,t,1000,A,";

struct Fixture {
  dir:   TempDir,
  store: Arc<SqliteStore>,
}

impl Fixture {
  async fn new() -> Self {
    Self {
      dir:   tempfile::tempdir().unwrap(),
      store: Arc::new(SqliteStore::open_in_memory().await.unwrap()),
    }
  }

  fn config(&self) -> ImportConfig {
    ImportConfig {
      source_dirs: vec![self.dir.path().to_path_buf()],
      retry_backoff_ms: 1,
      ..ImportConfig::default()
    }
  }

  fn orchestrator(&self, config: ImportConfig) -> Orchestrator<SqliteStore> {
    Orchestrator::new(self.store.clone(), config)
  }
}

fn completed(rows_loaded: u64, rows_skipped: u64) -> DatasetStatus {
  DatasetStatus::Completed { rows_loaded, rows_skipped }
}

#[tokio::test]
async fn tiny_bundle_lands_in_the_view() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);

  let summary = fx.orchestrator(fx.config()).run().await.unwrap();
  assert_eq!(summary.status_of("QCL"), Some(&completed(1, 0)));
  assert!(!summary.has_failures());

  let view = fx.store.observation_view("QCL").await.unwrap();
  assert_eq!(view.len(), 1);
  let row = &view[0];
  assert_eq!(row.area_name.as_deref(), Some("Afghanistan"));
  assert_eq!(row.m49_code.as_deref(), Some("004"));
  assert_eq!(row.item_name.as_deref(), Some("Wheat"));
  assert_eq!(row.element_name.as_deref(), Some("Production"));
  assert_eq!(row.year, 2020);
  assert_eq!(row.value, Some(1000.0));
  assert_eq!(row.flag.as_deref(), Some("A"));
  assert_eq!(row.flag_description.as_deref(), Some("Official"));

  let imports = fx.store.imports_for("QCL").await.unwrap();
  assert_eq!(imports[0].status, ImportStatus::Completed);
  assert_eq!(imports[0].stage, IngestStage::Completed);
  assert_eq!(imports[0].run_id, summary.run_id);
}

#[tokio::test]
async fn global_only_dataset_has_null_item_and_element() {
  let fx = Fixture::new().await;
  let facts = "Area Code,Area,Item Code,Item,Element Code,Element,Year,Value,Flag\n\
               4,Afghanistan,6601,Land area,5110,Area,2020,65286,A\n\
               8,Albania,6601,Land area,5110,Area,2020,2875,E\n";
  write_zip(fx.dir.path(), "RL_E_All_Data_(Normalized).zip", &[
    ("RL_E_All_Data_(Normalized).csv", facts),
    ("RL_E_AreaCodes.csv", AREAS),
    ("RL_E_Flags.csv", FLAGS),
  ]);

  let summary = fx.orchestrator(fx.config()).run().await.unwrap();
  assert_eq!(summary.status_of("RL"), Some(&completed(2, 0)));

  let view = fx.store.observation_view("RL").await.unwrap();
  assert_eq!(view.len(), 2);
  assert!(view.iter().all(|r| r.item_code.is_none() && r.element_code.is_none()));
  assert_eq!(fx.store.dimension_count(DimensionKind::Item).await.unwrap(), 0);
}

#[tokio::test]
async fn reimport_under_replace_keeps_one_observation() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);

  fx.orchestrator(fx.config()).run().await.unwrap();
  let again = fx.orchestrator(fx.config()).reimport(true).run().await.unwrap();

  assert_eq!(again.status_of("QCL"), Some(&completed(1, 0)));
  assert_eq!(fx.store.observation_count("QCL").await.unwrap(), 1);
  assert_eq!(fx.store.observation_view("QCL").await.unwrap().len(), 1);
  assert_eq!(fx.store.imports_for("QCL").await.unwrap().len(), 2);
}

#[tokio::test]
async fn resume_skips_completed_datasets() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "AAA", &[WHEAT_2020]);

  let first = fx.orchestrator(fx.config()).run().await.unwrap();
  assert_eq!(first.status_of("AAA"), Some(&completed(1, 0)));

  // B shows up only after A finished, as if the first run stopped there.
  full_bundle(fx.dir.path(), "BBB", &[WHEAT_2020]);
  let resumed = fx.orchestrator(fx.config()).run().await.unwrap();

  assert!(matches!(resumed.status_of("AAA"), Some(DatasetStatus::Skipped { .. })));
  assert_eq!(resumed.status_of("BBB"), Some(&completed(1, 0)));
  assert_eq!(fx.store.imports_for("AAA").await.unwrap().len(), 1);
}

#[tokio::test]
async fn interrupted_import_is_redone_on_resume() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);

  // An import left running by a crashed process.
  fx.store
    .begin_import(
      faostat_core::dataset::DatasetMetadata::new("QCL"),
      uuid::Uuid::new_v4(),
      chrono::Utc::now(),
    )
    .await
    .unwrap();

  let summary = fx.orchestrator(fx.config()).run().await.unwrap();
  assert_eq!(summary.status_of("QCL"), Some(&completed(1, 0)));

  let imports = fx.store.imports_for("QCL").await.unwrap();
  assert_eq!(imports[0].error.as_deref(), Some("interrupted"));
  assert_eq!(imports[1].status, ImportStatus::Completed);
}

#[tokio::test]
async fn corrupt_archive_fails_only_its_dataset() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);
  std::fs::write(fx.dir.path().join("BAD_E_All_Data_(Normalized).zip"), b"not a zip").unwrap();

  let summary = fx.orchestrator(fx.config()).run().await.unwrap();

  assert!(summary.has_failures());
  match summary.status_of("BAD") {
    Some(DatasetStatus::Failed { stage, .. }) => assert_eq!(*stage, IngestStage::Extracting),
    other => panic!("unexpected status: {other:?}"),
  }
  assert_eq!(summary.status_of("QCL"), Some(&completed(1, 0)));

  let bad = fx.store.imports_for("BAD").await.unwrap();
  assert_eq!(bad[0].status, ImportStatus::Failed);
  assert_eq!(bad[0].stage, IngestStage::Extracting);
}

#[tokio::test]
async fn unknown_item_is_skipped_and_counted() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[
    WHEAT_2020,
    "4,'004,Afghanistan,99,,Rye,5510,Production,2020,2020,t,5,A,",
  ]);

  let summary = fx.orchestrator(fx.config()).run().await.unwrap();
  assert_eq!(summary.status_of("QCL"), Some(&completed(1, 1)));
  assert_eq!(fx.store.observation_view("QCL").await.unwrap().len(), 1);
}

#[tokio::test]
async fn skip_rate_escalation_fails_the_dataset() {
  let fx = Fixture::new().await;
  let bad = "4,'004,Afghanistan,99,,Rye,5510,Production,2020,2020,t,5,A,";
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020, bad, bad, bad]);

  let config = ImportConfig { skip_threshold_min_rows: 2, max_skip_ratio: 0.5, ..fx.config() };
  let summary = fx.orchestrator(config).run().await.unwrap();

  match summary.status_of("QCL") {
    Some(DatasetStatus::Failed { stage, reason }) => {
      assert_eq!(*stage, IngestStage::LoadingFacts);
      assert!(reason.contains("rejected"), "{reason}");
    }
    other => panic!("unexpected status: {other:?}"),
  }
  assert_eq!(fx.store.observation_count("QCL").await.unwrap(), 0);
  assert!(fx.store.completed_datasets().await.unwrap().is_empty());
}

#[tokio::test]
async fn fully_rejected_dataset_fails_and_is_retried() {
  let fx = Fixture::new().await;
  let rye = |year: u32| format!("4,'004,Afghanistan,99,,Rye,5510,Production,{year},{year},t,5,A,");
  let rows: Vec<String> = (1990..2010).map(rye).collect();
  let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
  full_bundle(fx.dir.path(), "QCL", &rows);

  let first = fx.orchestrator(fx.config()).run().await.unwrap();
  match first.status_of("QCL") {
    Some(DatasetStatus::Failed { stage, reason }) => {
      assert_eq!(*stage, IngestStage::LoadingFacts);
      assert!(reason.contains("all 20 rows rejected"), "{reason}");
    }
    other => panic!("unexpected status: {other:?}"),
  }
  assert!(first.has_failures());
  assert!(fx.store.completed_datasets().await.unwrap().is_empty());

  let again = fx.orchestrator(fx.config()).run().await.unwrap();
  assert!(matches!(again.status_of("QCL"), Some(DatasetStatus::Failed { .. })));
}

#[tokio::test]
async fn reimport_under_append_keeps_both_loads() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);

  let config = || ImportConfig { reimport_policy: ReimportPolicy::Append, ..fx.config() };
  fx.orchestrator(config()).run().await.unwrap();
  let again = fx.orchestrator(config()).reimport(true).run().await.unwrap();

  assert_eq!(again.status_of("QCL"), Some(&completed(1, 0)));
  assert_eq!(fx.store.observation_count("QCL").await.unwrap(), 2);
  assert_eq!(fx.store.observation_view("QCL").await.unwrap().len(), 2);
  assert_eq!(fx.store.imports_for("QCL").await.unwrap().len(), 2);
}

#[tokio::test]
async fn filter_excludes_datasets() {
  let fx = Fixture::new().await;
  full_bundle(fx.dir.path(), "QCL", &[WHEAT_2020]);
  full_bundle(fx.dir.path(), "TCL", &[WHEAT_2020]);

  let config = ImportConfig { exclude: vec!["tcl".into()], ..fx.config() };
  let summary = fx.orchestrator(config).run().await.unwrap();

  assert_eq!(summary.datasets.len(), 1);
  assert!(summary.status_of("TCL").is_none());
}

#[tokio::test]
async fn concurrent_workers_share_global_dimensions() {
  let fx = Fixture::new().await;
  for code in ["AAA", "BBB", "CCC"] {
    full_bundle(fx.dir.path(), code, &[WHEAT_2020]);
  }

  let config = ImportConfig { workers: 3, ..fx.config() };
  let summary = fx.orchestrator(config).run().await.unwrap();

  let codes: Vec<&str> = summary.datasets.iter().map(|d| d.dataset_code.as_str()).collect();
  assert_eq!(codes, vec!["AAA", "BBB", "CCC"]);
  assert!(summary.datasets.iter().all(|d| d.status == completed(1, 0)));
  assert_eq!(fx.store.dimension_count(DimensionKind::Area).await.unwrap(), 2);
  assert_eq!(fx.store.dimension_count(DimensionKind::Flag).await.unwrap(), 2);
}

#[tokio::test]
async fn catalog_names_datasets_and_fills_metadata() {
  let fx = Fixture::new().await;
  let facts = format!("{FACT_HEADER}\n{WHEAT_2020}\n");
  write_zip(fx.dir.path(), "Production_Crops_Livestock_E_All_Data_(Normalized).zip", &[
    ("Production_Crops_Livestock_E_All_Data_(Normalized).csv", facts.as_str()),
    ("Production_Crops_Livestock_E_AreaCodes.csv", AREAS),
    ("Production_Crops_Livestock_E_ItemCodes.csv", "Item Code,Item\n15,Wheat\n"),
    ("Production_Crops_Livestock_E_Elements.csv", "Element Code,Element\n5510,Production\n"),
    ("Production_Crops_Livestock_E_Flags.csv", FLAGS),
  ]);
  let catalog = Catalog::from_slice(
    br#"{"Datasets":{"Dataset":[
      {"DatasetCode":"QCL","DatasetName":"Crops and livestock products","Topic":"Production",
       "FileLocation":"https://bulks-faostat.fao.org/production/Production_Crops_Livestock_E_All_Data_(Normalized).zip"},
      {"DatasetCode":"FS","DatasetName":"Food security"}
    ]}}"#,
  )
  .unwrap();

  let summary = fx.orchestrator(fx.config()).with_catalog(catalog).run().await.unwrap();
  assert_eq!(summary.status_of("QCL"), Some(&completed(1, 0)));

  let qcl = fx.store.get_dataset("QCL").await.unwrap().unwrap();
  assert_eq!(qcl.metadata.name.as_deref(), Some("Crops and livestock products"));
  assert_eq!(qcl.row_count, Some(1));
  // Catalog datasets without a bundle are still registered.
  assert!(fx.store.get_dataset("FS").await.unwrap().is_some());

  let view = fx.store.observation_view("QCL").await.unwrap();
  assert_eq!(view[0].dataset_name.as_deref(), Some("Crops and livestock products"));
}
