use super::routes::{ModelRoute, Provider, RouteTable, ANTHROPIC_API_VERSION};
use super::ModelInvoker;
use crate::errors::{BenchError, InvocationFault};
use crate::model::{GenerationParams, GenerationRequest, LlmResponse};
use async_trait::async_trait;
use serde_json::json;

/// Hosted model reached over HTTPS. Request body, path and auth header follow
/// the route resolved for `model_id`.
pub struct HttpModelInvoker {
    model_id: String,
    route: ModelRoute,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpModelInvoker {
    /// Fails with `UnknownModel` when no route matches, so a bad model id is
    /// reported before any question runs.
    pub fn new(
        model_id: &str,
        routes: &RouteTable,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, BenchError> {
        let route = routes.resolve(model_id)?.clone();
        let base_url = base_url
            .unwrap_or_else(|| route.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model_id: model_id.to_string(),
            route,
            base_url,
            api_key,
            client: reqwest::Client::new(),
        })
    }

    fn fault(&self, fault: InvocationFault, message: impl Into<String>) -> BenchError {
        BenchError::invocation(&self.model_id, fault, message)
    }
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn invoke(
        &self,
        req: GenerationRequest<'_>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, BenchError> {
        let shape = self.route.shape;
        let provider = self.route.provider;
        let url = format!("{}{}", self.base_url, shape.path(provider, &self.model_id));
        let body = shape.body(provider, &self.model_id, req.prompt, params);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        request = match (provider, &self.api_key) {
            (Provider::Anthropic, Some(key)) => request
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_API_VERSION),
            (Provider::Anthropic, None) => {
                request.header("anthropic-version", ANTHROPIC_API_VERSION)
            }
            (_, Some(key)) => request.header("Authorization", format!("Bearer {}", key)),
            (_, None) => request,
        };

        let resp = request.send().await.map_err(|e| {
            let fault = if e.is_timeout() {
                InvocationFault::Timeout
            } else {
                InvocationFault::Transport
            };
            self.fault(fault, e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let fault = if status.as_u16() == 401 || status.as_u16() == 403 {
                InvocationFault::Auth
            } else {
                InvocationFault::Transport
            };
            return Err(self.fault(
                fault,
                format!("{} API error {}: {}", provider.as_str(), status, error_text),
            ));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.fault(InvocationFault::MalformedResponse, e.to_string()))?;
        let text = shape.extract_text(&value).ok_or_else(|| {
            self.fault(
                InvocationFault::MalformedResponse,
                format!("{} response missing generated text", provider.as_str()),
            )
        })?;

        Ok(LlmResponse {
            text: text.to_string(),
            provider: provider.as_str().to_string(),
            model: self.model_id.clone(),
            meta: json!({ "usage": value.get("usage").cloned().unwrap_or_default() }),
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider_name(&self) -> &'static str {
        self.route.provider.as_str()
    }
}
