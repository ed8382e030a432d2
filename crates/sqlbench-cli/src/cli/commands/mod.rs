use super::args::*;
use serde::Serialize;
use sqlbench_core::backend::sqlite::SqliteBackend;
use sqlbench_core::backend::RelationalBackend;
use sqlbench_core::catalog::SchemaCatalog;
use sqlbench_core::config::{load_config, BackendKind, BenchConfig};
use sqlbench_core::engine::runner::{RunPolicy, Runner};
use sqlbench_core::errors::BenchError;
use sqlbench_core::evaluation::EvaluationEngine;
use sqlbench_core::generation::{GenerationLoop, LoopSettings};
use sqlbench_core::prompt::PromptBuilder;
use sqlbench_core::providers::llm::http::HttpModelInvoker;
use sqlbench_core::providers::llm::routes::RouteTable;
use sqlbench_core::providers::llm::ModelInvoker;
use sqlbench_core::providers::trace::TraceInvoker;
use sqlbench_core::report::json::{
    read_generation_log, write_evaluation_log, write_generation_log, write_json, ArtifactPaths,
};
use sqlbench_core::report::RunArtifacts;
use sqlbench_core::storage::Store;
use sqlbench_core::validity::ValidityChecker;
use sqlbench_metrics::DatasetSummary;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub mod check;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const INVALID_SQL: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

/// Model id that answers from `provider.trace_file` instead of a live API.
pub const REPLAY_MODEL: &str = "replay";

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args, true).await,
        Command::Generate(args) => cmd_run(args, false).await,
        Command::Evaluate(args) => cmd_evaluate(args).await,
        Command::Check(args) => check::cmd_check(args),
        Command::Runs(args) => cmd_runs(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    write_sample_config_if_missing(&args.config)?;
    Ok(exit_codes::OK)
}

fn write_sample_config_if_missing(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        ensure_parent_dir(path)?;
        sqlbench_core::config::write_sample_config(path)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists", path.display());
    }
    Ok(())
}

async fn cmd_run(args: RunArgs, evaluate: bool) -> anyhow::Result<i32> {
    let Some(mut cfg) = load_or_report(&args.config) else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }

    let mut questions = sqlbench_core::dataset::load_questions(&cfg.dataset)?;
    if let Some(n) = args.limit {
        questions.truncate(n);
    }

    let schema_ids = questions.iter().map(|q| q.schema_id.clone()).collect();
    let bench = match Bench::open(&cfg, schema_ids) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let invoker = match build_invoker(&cfg, args.trace_file.as_deref()) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let store = open_store(&args.db)?;
    let generation = GenerationLoop::new(
        invoker,
        ValidityChecker::new(bench.backend.clone(), &cfg.dialect),
        PromptBuilder::new(bench.catalog.clone()),
        cfg.generation.clone(),
        &cfg.dialect,
        LoopSettings::from(&cfg.settings),
    );
    let runner = Runner {
        store: store.clone(),
        generation: Some(generation),
        evaluation: bench.evaluation(&cfg),
        policy: RunPolicy {
            evaluate,
            ..RunPolicy::from(&cfg.settings)
        },
    };

    let artifacts = runner.run_suite(&cfg, &questions).await?;
    let paths = ArtifactPaths::new(&cfg.output_dir, &cfg.suite);
    write_generation_log(&paths.generation, &artifacts)?;
    eprintln!("wrote {}", paths.generation.display());

    if evaluate {
        finish_scoring(&store, &paths, &artifacts)?;
    } else {
        sqlbench_core::report::console::print_summary(&artifacts.reports);
    }
    Ok(exit_codes::OK)
}

async fn cmd_evaluate(args: EvaluateArgs) -> anyhow::Result<i32> {
    let Some(mut cfg) = load_or_report(&args.config) else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }

    let log = read_generation_log(&args.generation_log)?;
    if log.suite != cfg.suite {
        tracing::warn!(
            event = "sqlbench.evaluate.suite_mismatch",
            log_suite = %log.suite,
            config_suite = %cfg.suite
        );
    }
    // the run record describes the model that produced the log
    cfg.model = log.model.clone();

    let schema_ids = log
        .questions
        .iter()
        .map(|e| e.question.schema_id.clone())
        .collect();
    let bench = match Bench::open(&cfg, schema_ids) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let store = open_store(&args.db)?;
    let runner = Runner {
        store: store.clone(),
        generation: None,
        evaluation: bench.evaluation(&cfg),
        policy: RunPolicy::from(&cfg.settings),
    };
    let artifacts = runner.evaluate_log(&cfg, &log).await?;
    let paths = ArtifactPaths::new(&cfg.output_dir, &cfg.suite);
    finish_scoring(&store, &paths, &artifacts)?;
    Ok(exit_codes::OK)
}

fn cmd_runs(args: RunsArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    if let Some(run_id) = args.show {
        return match store.run_summary(run_id)? {
            Some(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                Ok(exit_codes::OK)
            }
            None => {
                eprintln!("run {} has no stored summary in {}", run_id, args.db.display());
                Ok(exit_codes::CONFIG_ERROR)
            }
        };
    }
    let runs = store.recent_runs(args.suite.as_deref(), args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(exit_codes::OK);
    }
    if runs.is_empty() {
        eprintln!("no runs recorded in {}", args.db.display());
        return Ok(exit_codes::OK);
    }
    println!(
        "{:>5}  {:<20} {:<28} {:<10} {:>9}  {:>6}  STARTED",
        "RUN", "SUITE", "MODEL", "STATUS", "EVALUATED", "ROW_F1"
    );
    for r in runs {
        let f1 = r
            .mean_row_f1
            .map(|v| format!("{:.3}", v))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>5}  {:<20} {:<28} {:<10} {:>9}  {:>6}  {}",
            r.id,
            r.suite,
            r.model,
            r.status,
            format!("{}/{}", r.evaluated, r.questions),
            f1,
            r.started_at
        );
    }
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    suite: &'a str,
    model: &'a str,
    run_id: i64,
    started_at: &'a str,
    finished_at: &'a str,
    #[serde(flatten)]
    summary: &'a DatasetSummary,
}

fn finish_scoring(store: &Store, paths: &ArtifactPaths, a: &RunArtifacts) -> anyhow::Result<()> {
    write_evaluation_log(&paths.evaluation, a)?;

    let summary = sqlbench_metrics::summarize(&a.reports);
    let file = serde_json::to_value(SummaryFile {
        suite: &a.suite,
        model: &a.model,
        run_id: a.run_id,
        started_at: &a.started_at,
        finished_at: &a.finished_at,
        summary: &summary,
    })?;
    write_json(&paths.summary, &file)?;
    store.attach_summary(a.run_id, &file)?;
    eprintln!(
        "wrote {} and {}",
        paths.evaluation.display(),
        paths.summary.display()
    );

    sqlbench_core::report::console::print_summary(&a.reports);
    print_scores(&summary);
    Ok(())
}

fn print_scores(s: &DatasetSummary) {
    let m = &s.means;
    for (label, v) in [("Table", &m.tables), ("Row", &m.rows), ("Column", &m.columns)] {
        eprintln!(
            "{:<7} precision={:.4} recall={:.4} f1={:.4}",
            label, v.precision, v.recall, v.f1
        );
    }
    eprintln!(
        "Valid predictions: {:.1}%  mean attempts: {:.2}",
        s.valid_rate * 100.0,
        s.mean_attempts
    );
    for (difficulty, d) in &s.by_difficulty {
        eprintln!(
            "  {:<12} n={:<4} table_f1={:.4} row_f1={:.4}",
            difficulty, d.questions, d.means.tables.f1, d.means.rows.f1
        );
    }
}

fn load_or_report(args: &ConfigArgs) -> Option<BenchConfig> {
    match load_config(&args.config, args.strict_config) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("config error: {}", e);
            None
        }
    }
}

/// Backend plus the catalog built from it at start-up.
pub(crate) struct Bench {
    pub backend: Arc<dyn RelationalBackend>,
    pub catalog: Arc<SchemaCatalog>,
}

impl Bench {
    /// Schemas without a database file are left out of the catalog so their
    /// questions fail individually as unknown schemas.
    pub fn open(cfg: &BenchConfig, mut schema_ids: BTreeSet<String>) -> Result<Self, BenchError> {
        let statement_timeout = Duration::from_millis(cfg.settings.statement_timeout_ms);
        let backend: Arc<dyn RelationalBackend> = match cfg.backend.kind {
            BackendKind::Sqlite => {
                let sqlite = SqliteBackend::new(&cfg.backend.root, statement_timeout);
                schema_ids.retain(|id| {
                    let present = cfg.schemas.contains_key(id) || sqlite.database_path(id).is_some();
                    if !present {
                        tracing::warn!(
                            event = "sqlbench.catalog.missing_database",
                            schema_id = %id,
                            root = %cfg.backend.root.display()
                        );
                    }
                    present
                });
                Arc::new(sqlite)
            }
        };
        let catalog = SchemaCatalog::load(&cfg.schemas, &schema_ids, backend.as_ref())?;
        Ok(Self {
            backend,
            catalog: Arc::new(catalog),
        })
    }

    fn evaluation(&self, cfg: &BenchConfig) -> EvaluationEngine {
        EvaluationEngine::new(
            self.backend.clone(),
            self.catalog.clone(),
            &cfg.dialect,
            cfg.settings.row_semantics,
        )
    }
}

fn build_invoker(
    cfg: &BenchConfig,
    trace_override: Option<&Path>,
) -> anyhow::Result<Arc<dyn ModelInvoker>> {
    let trace_file = trace_override.or(cfg.provider.trace_file.as_deref());
    if cfg.model == REPLAY_MODEL || trace_override.is_some() {
        let path = trace_file.ok_or_else(|| {
            anyhow::anyhow!("model '{}' needs provider.trace_file or --trace-file", cfg.model)
        })?;
        let invoker = TraceInvoker::from_path(&cfg.model, path)?;
        tracing::info!(
            event = "sqlbench.provider.replay",
            trace_file = %path.display(),
            entries = invoker.len()
        );
        return Ok(Arc::new(invoker));
    }

    let routes = RouteTable::with_routes(&cfg.provider.routes);
    let route = routes.resolve(&cfg.model)?;
    let key_env = cfg
        .provider
        .api_key_env
        .clone()
        .unwrap_or_else(|| route.provider.default_api_key_env().to_string());
    let api_key = std::env::var(&key_env).ok().filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!(
            event = "sqlbench.provider.missing_api_key",
            env = %key_env,
            provider = route.provider.as_str()
        );
    }
    let invoker = HttpModelInvoker::new(&cfg.model, &routes, cfg.provider.base_url.clone(), api_key)?;
    Ok(Arc::new(invoker))
}

fn open_store(db: &Path) -> anyhow::Result<Store> {
    ensure_parent_dir(db)?;
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
