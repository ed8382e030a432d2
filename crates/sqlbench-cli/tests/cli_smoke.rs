use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

const DATASET: &str = r#"[
  {"question_id": 0, "db_id": "shop", "question": "List all customer names",
   "SQL": "SELECT name FROM customers", "difficulty": "simple"},
  {"question_id": 1, "db_id": "shop", "question": "Delete customers",
   "SQL": "SELECT count(*) FROM customers", "difficulty": "moderate"},
  {"question_id": 2, "db_id": "warehouse", "question": "How many crates?",
   "SQL": "SELECT count(*) FROM crates", "difficulty": "simple"}
]"#;

const TRACE: &str = r#"{"question_id": 0, "attempt": 1, "text": "```sql\nSELECT name FROM customers\n```"}
{"question_id": 1, "text": "DROP TABLE customers;"}
{"question_id": 2, "text": "SELECT count(*) FROM crates"}
"#;

fn fixture(dir: &Path, model: &str) {
    std::fs::create_dir_all(dir.join("dbs")).unwrap();
    let conn = rusqlite::Connection::open(dir.join("dbs/shop.sqlite")).unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO customers VALUES (1, 'Alice');",
    )
    .unwrap();
    drop(conn);
    std::fs::write(dir.join("dev.json"), DATASET).unwrap();
    std::fs::write(dir.join("trace.jsonl"), TRACE).unwrap();
    std::fs::write(
        dir.join("bench.yaml"),
        format!(
            "version: 1\nsuite: smoke\nmodel: {model}\ndataset: dev.json\nbackend:\n  root: dbs\n\
             settings:\n  max_attempts: 2\nprovider:\n  trace_file: trace.jsonl\n"
        ),
    )
    .unwrap();
}

fn sqlbench(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sqlbench").unwrap();
    cmd.current_dir(dir).env("SQLBENCH_LOG", "warn");
    cmd
}

#[test]
fn test_version_prints_crate_version() {
    Command::cargo_bin("sqlbench")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_init_writes_sample_config_once() {
    let dir = tempdir().unwrap();
    sqlbench(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("created bench.yaml"));
    assert!(dir.path().join("bench.yaml").is_file());

    sqlbench(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_replay_run_writes_artifacts_and_history() {
    let dir = tempdir().unwrap();
    fixture(dir.path(), "replay");

    sqlbench(dir.path())
        .args(["run", "--db", "bench.db"])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "Questions: total=3 evaluated=1 valid=1 generated=0 exhausted=1 failed=1",
        ));

    let results = dir.path().join("results");
    for name in ["smoke_generation.json", "smoke_evaluation.json", "smoke_summary.json"] {
        assert!(results.join(name).is_file(), "missing {name}");
    }
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(results.join("smoke_summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["questions"], 3);
    assert_eq!(summary["failed_by_kind"]["unknown_schema"], 1);
    assert_eq!(summary["means"]["rows"]["f1"], 1.0);

    sqlbench(dir.path())
        .args(["runs", "--db", "bench.db", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"suite\": \"smoke\""));

    sqlbench(dir.path())
        .args(["runs", "--db", "bench.db", "--show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"unknown_schema\": 1"));
    sqlbench(dir.path())
        .args(["runs", "--db", "bench.db", "--show", "99"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no stored summary"));

    // the rejected DROP never touched the database
    let conn = rusqlite::Connection::open(dir.path().join("dbs/shop.sqlite")).unwrap();
    let n: i64 = conn
        .query_row("SELECT count(*) FROM customers", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n, 1);
}

#[test]
fn test_generate_then_evaluate() {
    let dir = tempdir().unwrap();
    fixture(dir.path(), "replay");

    sqlbench(dir.path())
        .args(["generate", "--db", "bench.db"])
        .assert()
        .success()
        .stderr(predicate::str::contains("generated=1"));
    assert!(!dir.path().join("results/smoke_evaluation.json").exists());

    sqlbench(dir.path())
        .args([
            "evaluate",
            "--db",
            "bench.db",
            "--generation-log",
            "results/smoke_generation.json",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("evaluated=1"));
    assert!(dir.path().join("results/smoke_evaluation.json").is_file());
}

#[test]
fn test_unknown_model_is_a_config_error() {
    let dir = tempdir().unwrap();
    fixture(dir.path(), "mystery-7b");

    sqlbench(dir.path())
        .args(["run", "--db", "bench.db"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config error"));
}

#[test]
fn test_strict_config_rejects_unknown_keys() {
    let dir = tempdir().unwrap();
    fixture(dir.path(), "replay");
    let path = dir.path().join("bench.yaml");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("retries: 5\n");
    std::fs::write(&path, raw).unwrap();

    sqlbench(dir.path())
        .args(["run", "--db", "bench.db", "--strict-config"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("retries"));
}

#[test]
fn test_check_rejects_writes_and_accepts_selects() {
    let dir = tempdir().unwrap();
    fixture(dir.path(), "replay");

    sqlbench(dir.path())
        .args(["check", "--schema", "shop", "--sql", "DROP TABLE customers;"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("rejected"));

    sqlbench(dir.path())
        .args([
            "check",
            "--schema",
            "shop",
            "--sql",
            "```sql\nSELECT name FROM customers\n```",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"customers\""));
}
