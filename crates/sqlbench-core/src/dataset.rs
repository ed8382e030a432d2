use crate::model::Question;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// On-disk question record in the BIRD layout.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    question_id: serde_json::Value,
    db_id: String,
    question: String,
    #[serde(rename = "SQL", alias = "sql", alias = "true_sql")]
    sql: String,
    #[serde(default, alias = "token_column_mapping")]
    evidence: Option<serde_json::Value>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDataset {
    Many(Vec<RawQuestion>),
    One(RawQuestion),
}

pub fn load_questions(path: &Path) -> anyhow::Result<Vec<Question>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    parse_questions(&raw).with_context(|| format!("failed to parse dataset {}", path.display()))
}

pub fn parse_questions(raw: &str) -> anyhow::Result<Vec<Question>> {
    let parsed: RawDataset = serde_json::from_str(raw)?;
    let items = match parsed {
        RawDataset::Many(v) => v,
        RawDataset::One(q) => vec![q],
    };

    let mut out = Vec::with_capacity(items.len());
    let mut seen = std::collections::HashSet::new();
    for (i, item) in items.into_iter().enumerate() {
        let id = match &item.question_id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => anyhow::bail!("record {}: unsupported question_id {}", i, other),
        };
        if !seen.insert(id.clone()) {
            anyhow::bail!("record {}: duplicate question_id {}", i, id);
        }
        out.push(Question {
            id,
            schema_id: item.db_id,
            text: item.question,
            ground_truth_sql: item.sql,
            evidence: item.evidence.and_then(evidence_text),
            difficulty: item.difficulty,
        });
    }
    Ok(out)
}

// Enrichment output stores mappings as objects; render them compactly.
fn evidence_text(v: serde_json::Value) -> Option<String> {
    let text = match v {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
