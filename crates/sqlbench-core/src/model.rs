use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub schema_id: String,
    pub text: String,
    pub ground_truth_sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl Question {
    pub fn difficulty_label(&self) -> &str {
        self.difficulty.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: Option<u32>,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> Option<u32> {
    Some(2)
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            top_k: default_top_k(),
        }
    }
}

/// One model call. The question id and attempt index let replay providers
/// answer without depending on prompt text.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub question_id: &'a str,
    pub attempt: u32,
    pub prompt: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt: u32,
    pub prompt: String,
    pub prompt_sha256: String,
    pub raw_output: String,
    pub normalized_sql: String,
    pub is_valid: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    Attempting,
    Valid,
    Exhausted,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Pending => "pending",
            GenerationState::Attempting => "attempting",
            GenerationState::Valid => "valid",
            GenerationState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Valid | GenerationState::Exhausted)
    }
}

/// Terminal state of one question's generation loop plus its audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub question: Question,
    pub state: GenerationState,
    pub attempts: Vec<GenerationAttempt>,
}

impl GenerationOutcome {
    /// The attempt that reached `Valid`; always the last one logged.
    pub fn accepted(&self) -> Option<&GenerationAttempt> {
        match self.state {
            GenerationState::Valid => self.attempts.last().filter(|a| a.is_valid),
            _ => None,
        }
    }
}

/// A single result cell. Reals with an exact integral value are stored as
/// integers so that `1` and `1.0` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(#[serde(with = "hex_bytes")] Vec<u8>),
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("x'{}'", hex::encode(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let inner = s
            .strip_prefix("x'")
            .and_then(|r| r.strip_suffix('\''))
            .ok_or_else(|| serde::de::Error::custom("expected x'..' blob literal"))?;
        hex::decode(inner).map_err(serde::de::Error::custom)
    }
}

impl CellValue {
    pub fn real(v: f64) -> Self {
        if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
            CellValue::Integer(v as i64)
        } else {
            CellValue::Real(v)
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Integer(_) => 1,
            CellValue::Real(_) => 2,
            CellValue::Text(_) => 3,
            CellValue::Blob(_) => 4,
        }
    }

    fn real_bits(v: f64) -> u64 {
        if v == 0.0 {
            0.0f64.to_bits()
        } else if v.is_nan() {
            f64::NAN.to_bits()
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            CellValue::Null => {}
            CellValue::Integer(i) => i.hash(state),
            CellValue::Real(r) => Self::real_bits(*r).hash(state),
            CellValue::Text(t) => t.hash(state),
            CellValue::Blob(b) => b.hash(state),
        }
    }
}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellValue::Integer(a), CellValue::Integer(b)) => a.cmp(b),
            (CellValue::Real(a), CellValue::Real(b)) => {
                f64::from_bits(Self::real_bits(*a)).total_cmp(&f64::from_bits(Self::real_bits(*b)))
            }
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            (CellValue::Blob(a), CellValue::Blob(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Ordered tuple of column values for one result row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<CellValue>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SetScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl SetScore {
    /// `overlap` is |GT ∩ Pred| (or the multiset overlap for bags).
    pub fn from_counts(overlap: usize, predicted: usize, ground_truth: usize) -> Self {
        let precision = if predicted == 0 {
            0.0
        } else {
            overlap as f64 / predicted as f64
        };
        let recall = if ground_truth == 0 {
            0.0
        } else {
            overlap as f64 / ground_truth as f64
        };
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            precision,
            recall,
            f1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBlock<T> {
    pub ground_truth: Vec<T>,
    pub predicted: Vec<T>,
    #[serde(flatten)]
    pub score: SetScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub question_id: String,
    pub schema_id: String,
    pub valid: bool,
    pub tables: MetricBlock<String>,
    pub columns: MetricBlock<String>,
    pub rows: MetricBlock<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Evaluated,
    /// Valid SQL accepted but not scored (`sqlbench generate`).
    Generated,
    Exhausted,
    Failed,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Evaluated => "evaluated",
            QuestionStatus::Generated => "generated",
            QuestionStatus::Exhausted => "exhausted",
            QuestionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: String,
    pub message: String,
}

impl From<&crate::errors::BenchError> for FailureRecord {
    fn from(e: &crate::errors::BenchError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Everything the batch learned about one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionReport {
    pub question: Question,
    pub status: QuestionStatus,
    pub attempts: Vec<GenerationAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_state: Option<GenerationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub duration_ms: u64,
}

impl QuestionReport {
    pub fn failed(
        question: Question,
        error: &crate::errors::BenchError,
        attempts: Vec<GenerationAttempt>,
    ) -> Self {
        Self {
            question,
            status: QuestionStatus::Failed,
            attempts,
            generation_state: None,
            evaluation: None,
            failure: Some(FailureRecord::from(error)),
            duration_ms: 0,
        }
    }

    /// Attempts consumed; 0 when the question failed before the model ran.
    pub fn attempts_used(&self) -> u32 {
        self.attempts.last().map(|a| a.attempt).unwrap_or(0)
    }
}
