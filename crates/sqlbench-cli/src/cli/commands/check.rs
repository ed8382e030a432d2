use super::{exit_codes, load_or_report, Bench};
use crate::cli::args::CheckArgs;
use sqlbench_core::normalize::normalize;
use sqlbench_core::sql_parse::SqlStaticParser;
use sqlbench_core::validity::ValidityChecker;
use std::collections::BTreeSet;

/// Normalizes one statement, runs the validity check and prints the verdict
/// with the catalog tables and columns it references.
pub fn cmd_check(args: CheckArgs) -> anyhow::Result<i32> {
    let Some(cfg) = load_or_report(&args.config) else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let bench = match Bench::open(&cfg, BTreeSet::from([args.schema.clone()])) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let sql = normalize(&args.sql);
    let checker = ValidityChecker::new(bench.backend.clone(), &cfg.dialect);
    let verdict = match checker.check(&sql, &args.schema) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let parser = SqlStaticParser::new(&cfg.dialect);
    let tables = bench
        .catalog
        .filter_tables(&args.schema, &parser.tables(&sql));
    let columns = bench
        .catalog
        .filter_columns(&args.schema, &parser.columns(&sql));

    let out = serde_json::json!({
        "schema": args.schema,
        "sql": sql,
        "validity": verdict,
        "tables": tables,
        "columns": columns,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(if verdict.is_valid() {
        exit_codes::OK
    } else {
        exit_codes::INVALID_SQL
    })
}
