use crate::catalog::TableDecl;
use crate::errors::ConfigError;
use crate::evaluation::RowSemantics;
use crate::model::GenerationParams;
use crate::providers::llm::routes::RouteConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod path_resolver;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    pub suite: String,
    pub model: String,
    #[serde(default = "default_dialect")]
    pub dialect: String,
    pub dataset: PathBuf,
    pub backend: BackendConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Static catalog. Schemas not listed here are introspected.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, Vec<TableDecl>>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub generation: GenerationParams,
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_dialect() -> String {
    "SQLite".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub row_semantics: RowSemantics,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_parallel() -> usize {
    1
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            parallel: default_parallel(),
            timeout_seconds: default_timeout_seconds(),
            statement_timeout_ms: default_statement_timeout_ms(),
            question_deadline_seconds: None,
            row_semantics: RowSemantics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// JSONL trace answering model calls offline (`model: replay`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

pub fn load_config(path: &Path, strict: bool) -> Result<BenchConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut cfg = parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))?;

    let r = path_resolver::PathResolver::new(path);
    r.resolve_in_place(&mut cfg.dataset);
    r.resolve_in_place(&mut cfg.backend.root);
    r.resolve_in_place(&mut cfg.output_dir);
    r.resolve_opt(&mut cfg.provider.trace_file);

    Ok(cfg)
}

/// Parses and validates config text without touching the filesystem.
pub fn parse_config(raw: &str, strict: bool) -> Result<BenchConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: BenchConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                meaningful_unknowns
            )));
        }
        tracing::warn!(
            event = "sqlbench.config.unknown_fields",
            fields = ?meaningful_unknowns,
            "ignored unknown config fields"
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.suite.trim().is_empty() {
        return Err(ConfigError("suite must not be empty".into()));
    }
    if cfg.settings.max_attempts == 0 {
        return Err(ConfigError("settings.max_attempts must be at least 1".into()));
    }
    if cfg.settings.parallel == 0 {
        return Err(ConfigError("settings.parallel must be at least 1".into()));
    }

    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

pub const SAMPLE_CONFIG: &str = r#"version: 1
suite: bird-dev
model: gpt-4o-mini
dialect: SQLite
dataset: data/dev.json
backend:
  kind: sqlite
  root: data/dev_databases
output_dir: results
settings:
  max_attempts: 3
  parallel: 1
  timeout_seconds: 60
  statement_timeout_ms: 30000
  row_semantics: set
generation:
  temperature: 0.1
  max_tokens: 1024
  top_p: 0.9
  top_k: 2
provider:
  api_key_env: OPENAI_API_KEY
# Optional static catalog; schemas not listed are introspected.
# schemas:
#   debit_card_specializing: [customers, gasstations, products, transactions_1k, yearmonth]
"#;
