use crate::errors::{BenchError, InvocationFault};
use crate::model::{GenerationParams, GenerationRequest, LlmResponse};
use crate::providers::llm::ModelInvoker;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Replays recorded model answers from a JSONL trace.
///
/// Each line carries `text` (or `response`) and either a `question_id` with an
/// optional `attempt`, or the exact `prompt`. Lookup order: question id and
/// attempt, then the prompt text, then the highest recorded attempt for the
/// question.
#[derive(Clone)]
pub struct TraceInvoker {
    model_id: String,
    by_attempt: Arc<HashMap<(String, u32), LlmResponse>>,
    by_prompt: Arc<HashMap<String, LlmResponse>>,
    latest: Arc<HashMap<String, (u32, LlmResponse)>>,
}

#[derive(serde::Deserialize)]
struct TraceEntry {
    schema_version: Option<u32>,
    r#type: Option<String>,
    #[serde(default)]
    question_id: Option<serde_json::Value>,
    attempt: Option<u32>,
    prompt: Option<String>,
    text: Option<String>,
    response: Option<String>,
    #[serde(default)]
    meta: serde_json::Value,
    model: Option<String>,
}

impl TraceInvoker {
    pub fn from_path(model_id: &str, path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to open trace file {}: {}", path.display(), e))?;
        Self::parse(model_id, &raw)
    }

    pub fn parse(model_id: &str, raw: &str) -> anyhow::Result<Self> {
        let mut by_attempt = HashMap::new();
        let mut by_prompt = HashMap::new();
        let mut latest: HashMap<String, (u32, LlmResponse)> = HashMap::new();

        for (i, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: TraceEntry = serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("line {}: failed to parse trace: {}", i + 1, e))?;

            if let Some(v) = entry.schema_version {
                if v != 1 {
                    anyhow::bail!("line {}: unsupported schema_version {}", i + 1, v);
                }
            }
            if let Some(t) = &entry.r#type {
                if t != "sqlbench.trace" {
                    anyhow::bail!("line {}: unsupported type {}", i + 1, t);
                }
            }

            let Some(text) = entry.text.or(entry.response) else {
                anyhow::bail!("line {}: missing `text`/`response` field", i + 1);
            };
            let resp = LlmResponse {
                text,
                provider: "replay".into(),
                model: entry.model.unwrap_or_else(|| model_id.to_string()),
                meta: entry.meta,
            };

            let qid = match entry.question_id {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                Some(other) => anyhow::bail!("line {}: unsupported question_id {}", i + 1, other),
            };
            if qid.is_none() && entry.prompt.is_none() {
                anyhow::bail!("line {}: entry needs `question_id` or `prompt`", i + 1);
            }

            if let Some(prompt) = entry.prompt {
                if by_prompt.contains_key(&prompt) && qid.is_none() {
                    anyhow::bail!("line {}: duplicate prompt in trace file", i + 1);
                }
                by_prompt.entry(prompt).or_insert_with(|| resp.clone());
            }
            if let Some(qid) = qid {
                let attempt = entry.attempt.unwrap_or(1);
                if by_attempt
                    .insert((qid.clone(), attempt), resp.clone())
                    .is_some()
                {
                    anyhow::bail!(
                        "line {}: duplicate entry for question {} attempt {}",
                        i + 1,
                        qid,
                        attempt
                    );
                }
                match latest.get(&qid) {
                    Some((a, _)) if *a > attempt => {}
                    _ => {
                        latest.insert(qid, (attempt, resp));
                    }
                }
            }
        }

        Ok(Self {
            model_id: model_id.to_string(),
            by_attempt: Arc::new(by_attempt),
            by_prompt: Arc::new(by_prompt),
            latest: Arc::new(latest),
        })
    }

    pub fn len(&self) -> usize {
        self.by_attempt.len() + self.by_prompt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ModelInvoker for TraceInvoker {
    async fn invoke(
        &self,
        req: GenerationRequest<'_>,
        _params: &GenerationParams,
    ) -> Result<LlmResponse, BenchError> {
        self.by_attempt
            .get(&(req.question_id.to_string(), req.attempt))
            .or_else(|| self.by_prompt.get(req.prompt))
            .or_else(|| self.latest.get(req.question_id).map(|(_, r)| r))
            .cloned()
            .ok_or_else(|| {
                BenchError::invocation(
                    &self.model_id,
                    InvocationFault::Transport,
                    format!(
                        "trace miss for question {} attempt {}",
                        req.question_id, req.attempt
                    ),
                )
            })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider_name(&self) -> &'static str {
        "replay"
    }
}
