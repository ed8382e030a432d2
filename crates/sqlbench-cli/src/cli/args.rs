use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqlbench",
    version,
    about = "Text-to-SQL benchmark runner: bounded generation retries, table- and row-level scoring"
)]
pub struct Cli {
    /// log output format (filter with SQLBENCH_LOG)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate and score every question in the dataset
    Run(RunArgs),
    /// Generate only; writes the generation log for a later `evaluate`
    Generate(RunArgs),
    /// Score a generation log without calling the model
    Evaluate(EvaluateArgs),
    /// Check one statement against a schema
    Check(CheckArgs),
    Init(InitArgs),
    /// List recorded runs
    Runs(RunsArgs),
    Version,
}

#[derive(clap::Args, Clone)]
pub struct ConfigArgs {
    #[arg(long, default_value = "bench.yaml")]
    pub config: PathBuf,

    /// reject unknown config keys instead of warning
    #[arg(long)]
    pub strict_config: bool,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, default_value = ".sqlbench/bench.db")]
    pub db: PathBuf,

    /// answer model calls from this JSONL trace (overrides provider.trace_file)
    #[arg(long)]
    pub trace_file: Option<PathBuf>,

    /// only run the first N questions
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Parser, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, default_value = ".sqlbench/bench.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub generation_log: PathBuf,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Parser, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long)]
    pub schema: String,

    /// raw model output; fences and comments are stripped first
    #[arg(long)]
    pub sql: String,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "bench.yaml")]
    pub config: PathBuf,
}

#[derive(Parser, Clone)]
pub struct RunsArgs {
    #[arg(long, default_value = ".sqlbench/bench.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub suite: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub limit: u32,

    /// print JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// print the stored dataset summary of one run
    #[arg(long, value_name = "RUN_ID")]
    pub show: Option<i64>,
}
