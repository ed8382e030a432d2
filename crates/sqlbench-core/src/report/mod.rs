use crate::model::QuestionReport;
use serde::{Deserialize, Serialize};

pub mod console;
pub mod json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub run_id: i64,
    pub suite: String,
    pub model: String,
    pub started_at: String,
    pub finished_at: String,
    pub reports: Vec<QuestionReport>,
}
