use crate::config::{BenchConfig, Settings};
use crate::errors::BenchError;
use crate::evaluation::EvaluationEngine;
use crate::fingerprint;
use crate::generation::{Deadline, GenerationLoop};
use crate::model::{
    FailureRecord, GenerationAttempt, GenerationOutcome, GenerationState, Question,
    QuestionReport, QuestionStatus,
};
use crate::report::json::{GenerationLog, GenerationLogEntry};
use crate::report::RunArtifacts;
use crate::storage::Store;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub parallel: usize,
    pub question_deadline: Option<Duration>,
    /// `false` stops after generation (`sqlbench generate`).
    pub evaluate: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            parallel: 4,
            question_deadline: None,
            evaluate: true,
        }
    }
}

impl From<&Settings> for RunPolicy {
    fn from(s: &Settings) -> Self {
        Self {
            parallel: s.parallel.max(1),
            question_deadline: s.question_deadline_seconds.map(Duration::from_secs),
            evaluate: true,
        }
    }
}

/// Drives questions through generation and evaluation with bounded
/// concurrency. Each question is independent: its failure never stops the
/// batch.
#[derive(Clone)]
pub struct Runner {
    pub store: Store,
    /// Absent when only replaying a generation log.
    pub generation: Option<GenerationLoop>,
    pub evaluation: EvaluationEngine,
    pub policy: RunPolicy,
}

enum Job {
    Generate(GenerationLoop, Question),
    Replay(GenerationLogEntry),
}

impl Job {
    fn question(&self) -> &Question {
        match self {
            Job::Generate(_, q) => q,
            Job::Replay(e) => &e.question,
        }
    }
}

impl Runner {
    pub async fn run_suite(
        &self,
        cfg: &BenchConfig,
        questions: &[Question],
    ) -> anyhow::Result<RunArtifacts> {
        let generation = self
            .generation
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("runner has no model configured"))?;
        let jobs = questions
            .iter()
            .map(|q| Job::Generate(generation.clone(), q.clone()))
            .collect();
        self.run_jobs(cfg, jobs).await
    }

    /// Scores a previously written generation log without calling the model.
    pub async fn evaluate_log(
        &self,
        cfg: &BenchConfig,
        log: &GenerationLog,
    ) -> anyhow::Result<RunArtifacts> {
        let jobs = log.questions.iter().cloned().map(Job::Replay).collect();
        self.run_jobs(cfg, jobs).await
    }

    async fn run_jobs(&self, cfg: &BenchConfig, jobs: Vec<Job>) -> anyhow::Result<RunArtifacts> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let run_id = self.store.create_run(cfg, &started_at)?;
        tracing::info!(
            event = "sqlbench.run.started",
            run_id,
            suite = %cfg.suite,
            model = %cfg.model,
            questions = jobs.len()
        );

        let sem = Arc::new(Semaphore::new(self.policy.parallel.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let question = job.question().clone();
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                this.run_job(job).await
            });
            handles.push((question, h));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (question, h) in handles {
            let report = match h.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(
                        event = "sqlbench.run.task_failed",
                        question_id = %question.id,
                        error = %e
                    );
                    QuestionReport {
                        question,
                        status: QuestionStatus::Failed,
                        attempts: vec![],
                        generation_state: None,
                        evaluation: None,
                        failure: Some(FailureRecord {
                            kind: "internal".into(),
                            message: format!("question task failed: {}", e),
                        }),
                        duration_ms: 0,
                    }
                }
            };
            self.record(cfg, run_id, &report)?;
            reports.push(report);
        }

        let finished_at = chrono::Utc::now().to_rfc3339();
        self.store.finalize_run(run_id, &finished_at, "completed")?;
        tracing::info!(
            event = "sqlbench.run.finished",
            run_id,
            questions = reports.len()
        );

        Ok(RunArtifacts {
            run_id,
            suite: cfg.suite.clone(),
            model: cfg.model.clone(),
            started_at,
            finished_at,
            reports,
        })
    }

    fn record(&self, cfg: &BenchConfig, run_id: i64, report: &QuestionReport) -> anyhow::Result<()> {
        let fp = report.attempts.first().map(|a| {
            fingerprint::compute(fingerprint::Context {
                suite: &cfg.suite,
                model: &cfg.model,
                question_id: &report.question.id,
                schema_id: &report.question.schema_id,
                prompt: &a.prompt,
                params: &cfg.generation,
                max_attempts: cfg.settings.max_attempts,
            })
            .hex
        });

        if let Some(fp) = &fp {
            if let Some(prev) = self.store.previous_status(fp, run_id)? {
                if prev != report.status.as_str() {
                    tracing::warn!(
                        event = "sqlbench.run.outcome_changed",
                        question_id = %report.question.id,
                        previous = %prev,
                        current = report.status.as_str()
                    );
                }
            }
        }

        self.store.insert_report(run_id, report, fp.as_deref())?;
        Ok(())
    }

    async fn run_job(&self, job: Job) -> QuestionReport {
        let started = Instant::now();
        let deadline = self.policy.question_deadline.map(Deadline::after);
        let mut report = match job {
            Job::Generate(generation, q) => self.generate(&generation, q, deadline).await,
            Job::Replay(entry) => self.replay(entry, deadline).await,
        };
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn generate(
        &self,
        generation: &GenerationLoop,
        question: Question,
        deadline: Option<Deadline>,
    ) -> QuestionReport {
        match generation.run(&question, deadline).await {
            Ok(outcome) => self.settle(outcome, deadline).await,
            Err(aborted) => QuestionReport::failed(question, &aborted.error, aborted.attempts),
        }
    }

    async fn replay(&self, entry: GenerationLogEntry, deadline: Option<Deadline>) -> QuestionReport {
        match (entry.failure, entry.state) {
            (Some(failure), state) => QuestionReport {
                question: entry.question,
                status: QuestionStatus::Failed,
                attempts: entry.attempts,
                generation_state: state,
                evaluation: None,
                failure: Some(failure),
                duration_ms: 0,
            },
            (None, Some(state)) if state.is_terminal() => {
                self.settle(
                    GenerationOutcome {
                        question: entry.question,
                        state,
                        attempts: entry.attempts,
                    },
                    deadline,
                )
                .await
            }
            (None, state) => QuestionReport {
                question: entry.question,
                status: QuestionStatus::Failed,
                attempts: entry.attempts,
                generation_state: state,
                evaluation: None,
                failure: Some(FailureRecord {
                    kind: "invalid_log".into(),
                    message: "generation log entry has no terminal state".into(),
                }),
                duration_ms: 0,
            },
        }
    }

    async fn settle(&self, outcome: GenerationOutcome, deadline: Option<Deadline>) -> QuestionReport {
        let accepted = outcome.accepted().cloned();
        let GenerationOutcome {
            question,
            state,
            attempts,
        } = outcome;

        let accepted = match accepted {
            Some(a) => a,
            None => {
                return QuestionReport {
                    question,
                    status: QuestionStatus::Exhausted,
                    attempts,
                    generation_state: Some(GenerationState::Exhausted),
                    evaluation: None,
                    failure: None,
                    duration_ms: 0,
                };
            }
        };

        if !self.policy.evaluate {
            return QuestionReport {
                question,
                status: QuestionStatus::Generated,
                attempts,
                generation_state: Some(state),
                evaluation: None,
                failure: None,
                duration_ms: 0,
            };
        }

        if let Some(d) = deadline.filter(|d| d.is_past()) {
            return expired(question, attempts, state, &d);
        }
        let engine = self.evaluation.clone();
        let q = question.clone();
        let scoring = tokio::task::spawn_blocking(move || engine.evaluate(&q, &accepted));
        let joined = match deadline {
            Some(d) => match timeout(d.remaining(), scoring).await {
                Ok(joined) => joined,
                Err(_) => return expired(question, attempts, state, &d),
            },
            None => scoring.await,
        };
        let scored = joined.unwrap_or_else(|e| {
            Err(BenchError::connection(
                &question.schema_id,
                format!("evaluation task failed: {}", e),
            ))
        });

        match scored {
            Ok(result) => QuestionReport {
                question,
                status: QuestionStatus::Evaluated,
                attempts,
                generation_state: Some(state),
                evaluation: Some(result),
                failure: None,
                duration_ms: 0,
            },
            Err(e) => {
                tracing::warn!(
                    event = "sqlbench.evaluation.aborted",
                    question_id = %question.id,
                    kind = e.kind(),
                    error = %e
                );
                let mut report = QuestionReport::failed(question, &e, attempts);
                report.generation_state = Some(state);
                report
            }
        }
    }
}

// Deadline hit after generation finished; the attempts stay on the report.
fn expired(
    question: Question,
    attempts: Vec<GenerationAttempt>,
    state: GenerationState,
    deadline: &Deadline,
) -> QuestionReport {
    let e = deadline.exceeded();
    tracing::warn!(
        event = "sqlbench.question.deadline_exceeded",
        question_id = %question.id,
        phase = "evaluation",
        error = %e
    );
    let mut report = QuestionReport::failed(question, &e, attempts);
    report.generation_state = Some(state);
    report
}
