//! SQL schema for the FAOSTAT SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS datasets (
    dataset_code   TEXT PRIMARY KEY,
    dataset_name   TEXT,
    topic          TEXT,
    description    TEXT,
    contact        TEXT,
    email          TEXT,
    date_update    TEXT,
    file_size      TEXT,
    file_rows      INTEGER,
    file_location  TEXT,
    row_count      INTEGER,           -- rows published by the last completed load
    active_load_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS areas (
    area_code INTEGER PRIMARY KEY,
    m49_code  TEXT,
    area_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    item_code    INTEGER PRIMARY KEY,
    cpc_code     TEXT,
    item_name    TEXT NOT NULL,
    dataset_code TEXT REFERENCES datasets(dataset_code)
);

CREATE TABLE IF NOT EXISTS elements (
    element_code INTEGER PRIMARY KEY,
    element_name TEXT NOT NULL,
    dataset_code TEXT REFERENCES datasets(dataset_code)
);

CREATE TABLE IF NOT EXISTS flags (
    flag_code        TEXT PRIMARY KEY,
    flag_description TEXT NOT NULL
);

-- One row per import attempt; doubles as the resume checkpoint.
CREATE TABLE IF NOT EXISTS imports (
    load_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_code TEXT NOT NULL REFERENCES datasets(dataset_code),
    run_id       TEXT NOT NULL,
    stage        TEXT NOT NULL,      -- IngestStage
    status       TEXT NOT NULL,      -- 'running' | 'completed' | 'failed'
    rows_loaded  INTEGER NOT NULL DEFAULT 0,
    rows_skipped INTEGER NOT NULL DEFAULT 0,
    error        TEXT,
    started_at   TEXT NOT NULL,
    completed_at TEXT
);

-- Observations are append-only; rows are only removed wholesale by load.
CREATE TABLE IF NOT EXISTS faostat_data (
    id           INTEGER PRIMARY KEY,
    dataset_code TEXT NOT NULL REFERENCES datasets(dataset_code),
    load_id      INTEGER NOT NULL REFERENCES imports(load_id),
    area_code    INTEGER REFERENCES areas(area_code),
    item_code    INTEGER REFERENCES items(item_code),
    element_code INTEGER REFERENCES elements(element_code),
    year         INTEGER NOT NULL,
    year_code    TEXT,
    month_code   INTEGER,
    month_name   TEXT,
    value        REAL,
    unit         TEXT,
    flag         TEXT REFERENCES flags(flag_code),
    note         TEXT
);

CREATE INDEX IF NOT EXISTS faostat_data_dataset_idx ON faostat_data(dataset_code, load_id);
CREATE INDEX IF NOT EXISTS faostat_data_area_idx    ON faostat_data(area_code);
CREATE INDEX IF NOT EXISTS faostat_data_item_idx    ON faostat_data(item_code);
CREATE INDEX IF NOT EXISTS faostat_data_year_idx    ON faostat_data(year);
CREATE INDEX IF NOT EXISTS imports_dataset_idx      ON imports(dataset_code, load_id);

-- Only loads at or below the dataset's active load are visible, which hides
-- running and failed imports from readers.
CREATE VIEW IF NOT EXISTS faostat_data_view AS
SELECT
    fd.id,
    fd.dataset_code,
    d.dataset_name,
    fd.area_code,
    a.area_name,
    a.m49_code,
    fd.item_code,
    i.item_name,
    fd.element_code,
    e.element_name,
    fd.year,
    fd.month_name,
    fd.value,
    fd.unit,
    fd.flag,
    f.flag_description,
    fd.note
FROM faostat_data fd
JOIN      datasets d ON fd.dataset_code = d.dataset_code
LEFT JOIN areas    a ON fd.area_code    = a.area_code
LEFT JOIN items    i ON fd.item_code    = i.item_code
LEFT JOIN elements e ON fd.element_code = e.element_code
LEFT JOIN flags    f ON fd.flag         = f.flag_code
WHERE fd.load_id <= d.active_load_id;

PRAGMA user_version = 1;
";
