use super::RunArtifacts;
use crate::model::{
    EvaluationResult, FailureRecord, GenerationAttempt, GenerationState, Question,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub generation: PathBuf,
    pub evaluation: PathBuf,
    pub summary: PathBuf,
}

impl ArtifactPaths {
    pub fn new(output_dir: &Path, suite: &str) -> Self {
        Self {
            generation: output_dir.join(format!("{}_generation.json", suite)),
            evaluation: output_dir.join(format!("{}_evaluation.json", suite)),
            summary: output_dir.join(format!("{}_summary.json", suite)),
        }
    }
}

/// Per-question generation audit; also the input of `sqlbench evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLogEntry {
    pub question: Question,
    #[serde(default)]
    pub state: Option<GenerationState>,
    pub attempts: Vec<GenerationAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationLog {
    pub suite: String,
    pub model: String,
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: String,
    pub questions: Vec<GenerationLogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationLog<'a> {
    pub suite: &'a str,
    pub model: &'a str,
    pub run_id: i64,
    pub results: Vec<&'a EvaluationResult>,
}

impl GenerationLog {
    pub fn from_artifacts(a: &RunArtifacts) -> Self {
        Self {
            suite: a.suite.clone(),
            model: a.model.clone(),
            run_id: a.run_id,
            started_at: a.started_at.clone(),
            finished_at: a.finished_at.clone(),
            questions: a
                .reports
                .iter()
                .map(|r| GenerationLogEntry {
                    question: r.question.clone(),
                    state: r.generation_state,
                    attempts: r.attempts.clone(),
                    failure: r.failure.clone(),
                })
                .collect(),
        }
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_generation_log(path: &Path, artifacts: &RunArtifacts) -> anyhow::Result<()> {
    write_json(path, &GenerationLog::from_artifacts(artifacts))
}

pub fn write_evaluation_log(path: &Path, artifacts: &RunArtifacts) -> anyhow::Result<()> {
    let log = EvaluationLog {
        suite: &artifacts.suite,
        model: &artifacts.model,
        run_id: artifacts.run_id,
        results: artifacts
            .reports
            .iter()
            .filter_map(|r| r.evaluation.as_ref())
            .collect(),
    };
    write_json(path, &log)
}

pub fn read_generation_log(path: &Path) -> anyhow::Result<GenerationLog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read generation log {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse generation log {}", path.display()))
}
