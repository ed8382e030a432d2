pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  suite TEXT NOT NULL,
  model TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  config_json TEXT,
  summary_json TEXT
);

CREATE TABLE IF NOT EXISTS generations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  question_id TEXT NOT NULL,
  schema_id TEXT NOT NULL,
  difficulty TEXT NOT NULL,
  status TEXT NOT NULL,
  state TEXT,
  fingerprint TEXT,
  failure_kind TEXT,
  failure_message TEXT,
  duration_ms INTEGER
);

CREATE TABLE IF NOT EXISTS attempts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  generation_id INTEGER NOT NULL REFERENCES generations(id),
  attempt INTEGER NOT NULL,
  prompt_sha256 TEXT NOT NULL,
  raw_output TEXT NOT NULL,
  normalized_sql TEXT NOT NULL,
  is_valid INTEGER NOT NULL,
  duration_ms INTEGER
);

CREATE TABLE IF NOT EXISTS evaluations (
  generation_id INTEGER PRIMARY KEY REFERENCES generations(id),
  valid INTEGER NOT NULL,
  table_precision REAL NOT NULL,
  table_recall REAL NOT NULL,
  table_f1 REAL NOT NULL,
  row_precision REAL NOT NULL,
  row_recall REAL NOT NULL,
  row_f1 REAL NOT NULL,
  column_f1 REAL NOT NULL,
  result_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_generations_run ON generations(run_id);
CREATE INDEX IF NOT EXISTS idx_generations_fingerprint ON generations(fingerprint);
"#;
