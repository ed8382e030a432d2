use crate::model::GenerationParams;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Inputs that determine what the model saw for one question.
pub struct Context<'a> {
    pub suite: &'a str,
    pub model: &'a str,
    pub question_id: &'a str,
    pub schema_id: &'a str,
    pub prompt: &'a str,
    pub params: &'a GenerationParams,
    pub max_attempts: u32,
}

/// Two generations with equal fingerprints were produced from identical
/// inputs, so their outcomes are directly comparable across runs.
pub fn compute(ctx: Context<'_>) -> Fingerprint {
    let p = ctx.params;
    let parts = vec![
        format!("suite={}", ctx.suite),
        format!("model={}", ctx.model),
        format!("question_id={}", ctx.question_id),
        format!("schema_id={}", ctx.schema_id),
        format!("prompt={}", ctx.prompt),
        format!(
            "params=temperature:{},max_tokens:{},top_p:{},top_k:{}",
            p.temperature,
            p.max_tokens,
            p.top_p,
            p.top_k.map(|k| k.to_string()).unwrap_or_default()
        ),
        format!("max_attempts={}", ctx.max_attempts),
        format!("sqlbench_version={}", env!("CARGO_PKG_VERSION")),
    ];

    let hex = sha256_hex(&parts.join("\n"));
    Fingerprint {
        hex,
        components: parts,
    }
}
