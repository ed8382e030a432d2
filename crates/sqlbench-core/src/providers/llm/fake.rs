use super::ModelInvoker;
use crate::errors::{BenchError, InvocationFault};
use crate::model::{GenerationParams, GenerationRequest, LlmResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub type ScriptStep = Result<String, InvocationFault>;

/// Answers from a fixed script, per question id. Used by tests and dry runs.
pub struct ScriptedInvoker {
    model_id: String,
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    fallback: Option<String>,
    calls: AtomicU32,
}

impl ScriptedInvoker {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            scripts: Mutex::new(HashMap::new()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Queues successive answers for `question_id`.
    pub fn script<I, S>(self, question_id: &str, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps(question_id, answers.into_iter().map(|a| Ok(a.into())))
    }

    /// Like [`script`](Self::script) but steps may be faults.
    pub fn steps(self, question_id: &str, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(question_id.to_string())
                .or_default()
                .extend(steps);
        }
        self
    }

    /// Answer returned once a question's script is used up.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        req: GenerationRequest<'_>,
        _params: &GenerationParams,
    ) -> Result<LlmResponse, BenchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut scripts = self.scripts.lock().map_err(|_| {
                BenchError::invocation(&self.model_id, InvocationFault::Transport, "script lock poisoned")
            })?;
            scripts
                .get_mut(req.question_id)
                .and_then(|q| q.pop_front())
        };
        let text = match step {
            Some(Ok(text)) => text,
            Some(Err(fault)) => {
                return Err(BenchError::invocation(
                    &self.model_id,
                    fault,
                    format!("scripted {} fault", fault.as_str()),
                ))
            }
            None => self.fallback.clone().ok_or_else(|| {
                BenchError::invocation(
                    &self.model_id,
                    InvocationFault::Transport,
                    format!("no scripted answer for question {}", req.question_id),
                )
            })?,
        };
        Ok(LlmResponse {
            text,
            provider: "fake".into(),
            model: self.model_id.clone(),
            meta: serde_json::json!({}),
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(qid: &str, attempt: u32) -> GenerationRequest<'_> {
        GenerationRequest {
            question_id: qid,
            attempt,
            prompt: "p",
        }
    }

    #[tokio::test]
    async fn test_script_plays_in_order_then_falls_back() {
        let inv = ScriptedInvoker::new("fake-sql")
            .script("1", ["SELECT nope", "SELECT 1"])
            .with_fallback("SELECT 0");
        let p = GenerationParams::default();
        assert_eq!(inv.invoke(req("1", 1), &p).await.unwrap().text, "SELECT nope");
        assert_eq!(inv.invoke(req("1", 2), &p).await.unwrap().text, "SELECT 1");
        assert_eq!(inv.invoke(req("1", 3), &p).await.unwrap().text, "SELECT 0");
        assert_eq!(inv.invoke(req("2", 1), &p).await.unwrap().text, "SELECT 0");
        assert_eq!(inv.calls(), 4);
    }

    #[tokio::test]
    async fn test_scripted_fault() {
        let inv = ScriptedInvoker::new("fake-sql")
            .steps("1", [Err(InvocationFault::Transport)]);
        let err = inv
            .invoke(req("1", 1), &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "model_invocation");
        assert!(inv.invoke(req("1", 2), &GenerationParams::default()).await.is_err());
    }
}
