//! Bounded-retry generation loop.
//!
//! ```text
//! Pending -> Attempting -(valid)-> Valid
//!               |  ^
//!     (invalid, i < max)
//!               |
//!               +-(invalid, i = max)-> Exhausted
//! ```
//!
//! A model or backend connection failure, or an expired question deadline,
//! leaves the machine without a terminal state and is returned as
//! [`AbortedGeneration`].

use crate::config::Settings;
use crate::errors::{BenchError, InvocationFault};
use crate::fingerprint::sha256_hex;
use crate::model::{
    GenerationAttempt, GenerationOutcome, GenerationParams, GenerationRequest, GenerationState,
    Question,
};
use crate::normalize::normalize;
use crate::prompt::PromptBuilder;
use crate::providers::llm::ModelInvoker;
use crate::validity::{Validity, ValidityChecker};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transition taken after attempt `attempt` (1-based) of `max` was checked.
pub fn advance(valid: bool, attempt: u32, max: u32) -> GenerationState {
    if valid {
        GenerationState::Valid
    } else if attempt >= max {
        GenerationState::Exhausted
    } else {
        GenerationState::Attempting
    }
}

/// A question whose loop stopped on a fatal error. Attempts completed before
/// the failure are kept for the log.
#[derive(Debug, Clone)]
pub struct AbortedGeneration {
    pub error: BenchError,
    pub attempts: Vec<GenerationAttempt>,
}

/// Wall-clock budget for one question, shared by generation and evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_past(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn exceeded(&self) -> BenchError {
        BenchError::DeadlineExceeded {
            millis: self.budget.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl From<&Settings> for LoopSettings {
    fn from(s: &Settings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            call_timeout: Duration::from_secs(s.timeout_seconds),
        }
    }
}

#[derive(Clone)]
pub struct GenerationLoop {
    invoker: Arc<dyn ModelInvoker>,
    checker: ValidityChecker,
    prompts: PromptBuilder,
    params: GenerationParams,
    dialect: String,
    settings: LoopSettings,
}

impl GenerationLoop {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        checker: ValidityChecker,
        prompts: PromptBuilder,
        params: GenerationParams,
        dialect: &str,
        settings: LoopSettings,
    ) -> Self {
        Self {
            invoker,
            checker,
            prompts,
            params,
            dialect: dialect.to_string(),
            settings,
        }
    }

    pub fn model_id(&self) -> &str {
        self.invoker.model_id()
    }

    /// Runs the retry loop for one question. With a `deadline`, no attempt
    /// starts after it passes and each model call is cut short at it.
    pub async fn run(
        &self,
        question: &Question,
        deadline: Option<Deadline>,
    ) -> Result<GenerationOutcome, AbortedGeneration> {
        let abort = |error: BenchError, attempts: Vec<GenerationAttempt>| {
            tracing::warn!(
                event = "sqlbench.generation.aborted",
                question_id = %question.id,
                kind = error.kind(),
                error = %error,
                attempts = attempts.len()
            );
            AbortedGeneration { error, attempts }
        };

        let prompt = self
            .prompts
            .build(
                &question.schema_id,
                &question.text,
                &self.dialect,
                question.evidence.as_deref(),
            )
            .map_err(|e| abort(e, vec![]))?;
        let prompt_sha256 = sha256_hex(&prompt);

        let max = self.settings.max_attempts;
        let mut state = GenerationState::Pending;
        let mut attempts = Vec::with_capacity(max as usize);

        for attempt in 1..=max {
            if let Some(d) = deadline.filter(|d| d.is_past()) {
                return Err(abort(d.exceeded(), attempts));
            }
            let req = GenerationRequest {
                question_id: &question.id,
                attempt,
                prompt: &prompt,
            };

            let started = Instant::now();
            let raw_output = match self.call_model(req, deadline).await {
                Ok(text) => text,
                Err(e) => return Err(abort(e, attempts)),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let normalized_sql = normalize(&raw_output);
            let checked = match deadline {
                Some(d) => tokio::time::timeout(
                    d.remaining(),
                    self.check(&normalized_sql, &question.schema_id),
                )
                .await
                .unwrap_or_else(|_| Err(d.exceeded())),
                None => self.check(&normalized_sql, &question.schema_id).await,
            };
            let verdict = match checked {
                Ok(v) => v,
                Err(e) => {
                    attempts.push(GenerationAttempt {
                        attempt,
                        prompt: prompt.clone(),
                        prompt_sha256: prompt_sha256.clone(),
                        raw_output,
                        normalized_sql,
                        is_valid: false,
                        duration_ms,
                    });
                    return Err(abort(e, attempts));
                }
            };

            let is_valid = verdict.is_valid();
            let reason = match &verdict {
                Validity::Valid => String::new(),
                Validity::Rejected(r) | Validity::Failed(r) => r.clone(),
            };
            tracing::info!(
                event = "sqlbench.generation.attempt",
                question_id = %question.id,
                attempt,
                max_attempts = max,
                valid = is_valid,
                duration_ms,
                reason = %reason
            );

            attempts.push(GenerationAttempt {
                attempt,
                prompt: prompt.clone(),
                prompt_sha256: prompt_sha256.clone(),
                raw_output,
                normalized_sql,
                is_valid,
                duration_ms,
            });

            state = advance(is_valid, attempt, max);
            if state.is_terminal() {
                break;
            }
        }

        Ok(GenerationOutcome {
            question: question.clone(),
            state,
            attempts,
        })
    }

    async fn call_model(
        &self,
        req: GenerationRequest<'_>,
        deadline: Option<Deadline>,
    ) -> Result<String, BenchError> {
        let limit = self.settings.call_timeout;
        let t = deadline.map_or(limit, |d| d.remaining().min(limit));
        match tokio::time::timeout(t, self.invoker.invoke(req, &self.params)).await {
            Ok(resp) => Ok(resp?.text),
            Err(_) => match deadline {
                Some(d) if t < limit || d.is_past() => Err(d.exceeded()),
                _ => Err(BenchError::invocation(
                    self.invoker.model_id(),
                    InvocationFault::Timeout,
                    format!("no response within {}s", limit.as_secs_f64()),
                )),
            },
        }
    }

    async fn check(&self, sql: &str, schema_id: &str) -> Result<Validity, BenchError> {
        let checker = self.checker.clone();
        let sql = sql.to_string();
        let schema = schema_id.to_string();
        tokio::task::spawn_blocking(move || checker.check(&sql, &schema))
            .await
            .map_err(|e| BenchError::connection(schema_id, format!("validity task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::catalog::{SchemaCatalog, TableSchema};
    use crate::model::LlmResponse;
    use crate::providers::llm::fake::ScriptedInvoker;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct Fixture {
        _dir: tempfile::TempDir,
        checker: ValidityChecker,
        prompts: PromptBuilder,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open(dir.path().join("shop.sqlite")).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO customers VALUES (1, 'Alice');",
        )
        .unwrap();
        drop(conn);
        let backend = Arc::new(SqliteBackend::new(dir.path(), Duration::from_secs(5)));
        let tables: Vec<TableSchema> = {
            use crate::backend::RelationalBackend;
            backend.introspect("shop").unwrap()
        };
        let catalog = SchemaCatalog::from_tables(BTreeMap::from([("shop".to_string(), tables)]));
        Fixture {
            _dir: dir,
            checker: ValidityChecker::new(backend, "SQLite"),
            prompts: PromptBuilder::new(Arc::new(catalog)),
        }
    }

    fn question(id: &str, schema: &str) -> Question {
        Question {
            id: id.into(),
            schema_id: schema.into(),
            text: "List customer names".into(),
            ground_truth_sql: "SELECT name FROM customers".into(),
            evidence: None,
            difficulty: Some("simple".into()),
        }
    }

    fn looped(f: &Fixture, invoker: Arc<dyn ModelInvoker>, max: u32) -> GenerationLoop {
        GenerationLoop::new(
            invoker,
            f.checker.clone(),
            f.prompts.clone(),
            GenerationParams::default(),
            "SQLite",
            LoopSettings {
                max_attempts: max,
                call_timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_advance_transitions() {
        assert_eq!(advance(true, 1, 3), GenerationState::Valid);
        assert_eq!(advance(false, 1, 3), GenerationState::Attempting);
        assert_eq!(advance(false, 3, 3), GenerationState::Exhausted);
        assert_eq!(advance(true, 3, 3), GenerationState::Valid);
        assert_eq!(advance(false, 1, 1), GenerationState::Exhausted);
    }

    #[tokio::test]
    async fn test_halts_at_first_valid() {
        let f = fixture();
        let inv = Arc::new(ScriptedInvoker::new("fake-sql").script(
            "1",
            [
                "DROP TABLE customers;",
                "```sql\nSELECT name FROM customers -- names\n```",
                "SELECT 1",
            ],
        ));
        let out = looped(&f, inv.clone(), 3).run(&question("1", "shop"), None).await.unwrap();
        assert_eq!(out.state, GenerationState::Valid);
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(inv.calls(), 2);
        assert!(!out.attempts[0].is_valid);
        let accepted = out.accepted().unwrap();
        assert_eq!(accepted.attempt, 2);
        assert_eq!(accepted.normalized_sql, "SELECT name FROM customers");
        assert_eq!(out.attempts[0].prompt_sha256, out.attempts[1].prompt_sha256);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        let f = fixture();
        let inv = Arc::new(ScriptedInvoker::new("fake-sql").with_fallback("SELECT nope FROM customers"));
        let out = looped(&f, inv.clone(), 3).run(&question("1", "shop"), None).await.unwrap();
        assert_eq!(out.state, GenerationState::Exhausted);
        assert_eq!(out.attempts.len(), 3);
        assert_eq!(inv.calls(), 3);
        assert!(out.accepted().is_none());
        let idx: Vec<u32> = out.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(idx, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_without_retry() {
        let f = fixture();
        let inv = Arc::new(ScriptedInvoker::new("fake-sql").steps(
            "1",
            [
                Ok("SELECT nope".to_string()),
                Err(InvocationFault::Transport),
                Ok("SELECT 1".to_string()),
            ],
        ));
        let aborted = looped(&f, inv.clone(), 3)
            .run(&question("1", "shop"), None)
            .await
            .unwrap_err();
        assert_eq!(aborted.error.kind(), "model_invocation");
        assert_eq!(aborted.attempts.len(), 1);
        assert_eq!(inv.calls(), 2);
    }

    struct SlowInvoker;

    #[async_trait]
    impl ModelInvoker for SlowInvoker {
        async fn invoke(
            &self,
            _req: GenerationRequest<'_>,
            _params: &GenerationParams,
        ) -> Result<LlmResponse, BenchError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(LlmResponse::default())
        }

        fn model_id(&self) -> &str {
            "slow"
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_model_timeout_is_transport_fault() {
        let f = fixture();
        let mut l = looped(&f, Arc::new(SlowInvoker), 3);
        l.settings.call_timeout = Duration::from_millis(20);
        let aborted = l.run(&question("1", "shop"), None).await.unwrap_err();
        match aborted.error {
            BenchError::ModelInvocation { fault, .. } => assert_eq!(fault, InvocationFault::Timeout),
            other => panic!("unexpected {other:?}"),
        }
        assert!(aborted.attempts.is_empty());
    }

    /// Answers attempt 1 at once with invalid SQL, then hangs.
    struct StallsAfterFirst;

    #[async_trait]
    impl ModelInvoker for StallsAfterFirst {
        async fn invoke(
            &self,
            req: GenerationRequest<'_>,
            _params: &GenerationParams,
        ) -> Result<LlmResponse, BenchError> {
            if req.attempt > 1 {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Ok(LlmResponse {
                text: "SELECT nope FROM customers".into(),
                ..LlmResponse::default()
            })
        }

        fn model_id(&self) -> &str {
            "stalls-after-first"
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_deadline_keeps_attempts_made_before_it() {
        let f = fixture();
        let started = Instant::now();
        let aborted = looped(&f, Arc::new(StallsAfterFirst), 3)
            .run(
                &question("1", "shop"),
                Some(Deadline::after(Duration::from_millis(500))),
            )
            .await
            .unwrap_err();
        assert_eq!(aborted.error.kind(), "deadline_exceeded");
        assert_eq!(aborted.attempts.len(), 1);
        assert_eq!(aborted.attempts[0].attempt, 1);
        assert!(!aborted.attempts[0].is_valid);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_expired_deadline_makes_no_call() {
        let f = fixture();
        let inv = Arc::new(ScriptedInvoker::new("fake-sql").with_fallback("SELECT 1"));
        let aborted = looped(&f, inv.clone(), 3)
            .run(&question("1", "shop"), Some(Deadline::after(Duration::ZERO)))
            .await
            .unwrap_err();
        assert_eq!(aborted.error.kind(), "deadline_exceeded");
        assert!(aborted.attempts.is_empty());
        assert_eq!(inv.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_schema_aborts_before_model_call() {
        let f = fixture();
        let inv = Arc::new(ScriptedInvoker::new("fake-sql").with_fallback("SELECT 1"));
        let aborted = looped(&f, inv.clone(), 3)
            .run(&question("1", "shoop"), None)
            .await
            .unwrap_err();
        assert_eq!(aborted.error.kind(), "unknown_schema");
        assert_eq!(inv.calls(), 0);
    }
}
