use crate::errors::BenchError;
use crate::model::{GenerationParams, GenerationRequest, LlmResponse};
use async_trait::async_trait;

/// A model bound to one model id at construction.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        req: GenerationRequest<'_>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, BenchError>;

    fn model_id(&self) -> &str;

    fn provider_name(&self) -> &'static str;
}

pub mod fake;
pub mod http;
pub mod routes;
