//! Dataset-level aggregation of per-question scores.

use serde::{Deserialize, Serialize};
use sqlbench_core::model::{QuestionReport, QuestionStatus, SetScore};
use std::collections::BTreeMap;

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreMeans {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ScoreMeans {
    pub fn of<'a>(scores: impl IntoIterator<Item = &'a SetScore>) -> Self {
        let (mut p, mut r, mut f) = (Vec::new(), Vec::new(), Vec::new());
        for s in scores {
            p.push(s.precision);
            r.push(s.recall);
            f.push(s.f1);
        }
        Self {
            precision: mean(&p),
            recall: mean(&r),
            f1: mean(&f),
        }
    }
}

/// Table, row and column means over evaluated questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMeans {
    pub tables: ScoreMeans,
    pub rows: ScoreMeans,
    pub columns: ScoreMeans,
}

impl MetricMeans {
    fn of(reports: &[&QuestionReport]) -> Self {
        let evals: Vec<_> = reports.iter().filter_map(|r| r.evaluation.as_ref()).collect();
        Self {
            tables: ScoreMeans::of(evals.iter().map(|e| &e.tables.score)),
            rows: ScoreMeans::of(evals.iter().map(|e| &e.rows.score)),
            columns: ScoreMeans::of(evals.iter().map(|e| &e.columns.score)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultySummary {
    pub questions: usize,
    pub evaluated: usize,
    pub means: MetricMeans,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub questions: usize,
    pub evaluated: usize,
    pub generated: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub failed_by_kind: BTreeMap<String, usize>,
    /// Share of evaluated questions whose prediction executed and returned rows.
    pub valid_rate: f64,
    /// Over questions that reached the model at least once.
    pub mean_attempts: f64,
    pub means: MetricMeans,
    pub by_difficulty: BTreeMap<String, DifficultySummary>,
}

pub fn summarize(reports: &[QuestionReport]) -> DatasetSummary {
    let mut s = DatasetSummary {
        questions: reports.len(),
        ..DatasetSummary::default()
    };

    let mut validity = Vec::new();
    let mut attempts = Vec::new();
    let mut grouped: BTreeMap<String, Vec<&QuestionReport>> = BTreeMap::new();

    for r in reports {
        match r.status {
            QuestionStatus::Evaluated => s.evaluated += 1,
            QuestionStatus::Generated => s.generated += 1,
            QuestionStatus::Exhausted => s.exhausted += 1,
            QuestionStatus::Failed => {
                s.failed += 1;
                let kind = r
                    .failure
                    .as_ref()
                    .map(|f| f.kind.clone())
                    .unwrap_or_else(|| "unknown".into());
                *s.failed_by_kind.entry(kind).or_default() += 1;
            }
        }
        if let Some(e) = &r.evaluation {
            validity.push(if e.valid { 1.0 } else { 0.0 });
        }
        if r.attempts_used() > 0 {
            attempts.push(r.attempts_used() as f64);
        }
        grouped
            .entry(r.question.difficulty_label().to_string())
            .or_default()
            .push(r);
    }

    s.valid_rate = mean(&validity);
    s.mean_attempts = mean(&attempts);
    s.means = MetricMeans::of(&reports.iter().collect::<Vec<_>>());
    s.by_difficulty = grouped
        .into_iter()
        .map(|(label, rs)| {
            let d = DifficultySummary {
                questions: rs.len(),
                evaluated: rs.iter().filter(|r| r.evaluation.is_some()).count(),
                means: MetricMeans::of(&rs),
            };
            (label, d)
        })
        .collect();

    tracing::debug!(
        event = "sqlbench.metrics.summarized",
        questions = s.questions,
        evaluated = s.evaluated,
        row_f1 = s.means.rows.f1
    );
    s
}
