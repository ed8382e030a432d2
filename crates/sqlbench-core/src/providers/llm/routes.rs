//! Model id → provider and request shape.
//!
//! Routing is a prefix table; the longest matching prefix wins, so
//! `gpt-3.5-turbo-instruct` can use the completion endpoint while every other
//! `gpt-` model uses chat.

use crate::errors::{BenchError, InvocationFault};
use crate::model::GenerationParams;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Bedrock,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Bedrock => "bedrock",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Bedrock => "https://bedrock-runtime.us-east-1.amazonaws.com",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Bedrock => "AWS_BEARER_TOKEN_BEDROCK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    /// Single prompt string, `choices[0].text`.
    Completion,
    /// One user message, `choices[0].message.content`.
    Chat,
    /// Messages API, `content[0].text`.
    AnthropicMessages,
    /// `inputText`, `results[0].outputText`.
    TitanText,
    /// `prompt`, `generation`.
    LlamaPrompt,
}

impl RequestShape {
    pub fn path(&self, provider: Provider, model_id: &str) -> String {
        match (provider, self) {
            (Provider::Bedrock, _) => format!("/model/{}/invoke", model_id),
            (_, RequestShape::Completion) => "/v1/completions".to_string(),
            (_, RequestShape::AnthropicMessages) => "/v1/messages".to_string(),
            _ => "/v1/chat/completions".to_string(),
        }
    }

    pub fn body(
        &self,
        provider: Provider,
        model_id: &str,
        prompt: &str,
        p: &GenerationParams,
    ) -> Value {
        match self {
            RequestShape::Completion => json!({
                "model": model_id,
                "prompt": prompt,
                "temperature": p.temperature,
                "max_tokens": p.max_tokens,
                "top_p": p.top_p,
            }),
            RequestShape::Chat => json!({
                "model": model_id,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": p.temperature,
                "max_tokens": p.max_tokens,
                "top_p": p.top_p,
            }),
            RequestShape::AnthropicMessages => {
                let mut body = json!({
                    "max_tokens": p.max_tokens,
                    "messages": [{ "role": "user", "content": prompt }],
                    "temperature": p.temperature,
                    "top_p": p.top_p,
                });
                if let Some(k) = p.top_k {
                    body["top_k"] = json!(k);
                }
                if provider == Provider::Bedrock {
                    body["anthropic_version"] = json!(BEDROCK_ANTHROPIC_VERSION);
                } else {
                    body["model"] = json!(model_id);
                }
                body
            }
            RequestShape::TitanText => {
                let mut body = json!({
                    "inputText": prompt,
                    "textGenerationConfig": {
                        "maxTokenCount": p.max_tokens,
                        "temperature": p.temperature,
                        "topP": p.top_p,
                    }
                });
                if let Some(k) = p.top_k {
                    body["textGenerationConfig"]["topK"] = json!(k);
                }
                body
            }
            RequestShape::LlamaPrompt => json!({
                "prompt": prompt,
                "max_gen_len": p.max_tokens,
                "temperature": p.temperature,
                "top_p": p.top_p,
            }),
        }
    }

    pub fn extract_text<'a>(&self, response: &'a Value) -> Option<&'a str> {
        let pointer = match self {
            RequestShape::Completion => "/choices/0/text",
            RequestShape::Chat => "/choices/0/message/content",
            RequestShape::AnthropicMessages => "/content/0/text",
            RequestShape::TitanText => "/results/0/outputText",
            RequestShape::LlamaPrompt => "/generation",
        };
        response.pointer(pointer).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoute {
    pub prefix: String,
    pub provider: Provider,
    pub shape: RequestShape,
}

/// Routes as written under `provider.routes` in the config.
pub type RouteConfig = ModelRoute;

impl ModelRoute {
    fn new(prefix: &str, provider: Provider, shape: RequestShape) -> Self {
        Self {
            prefix: prefix.to_string(),
            provider,
            shape,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<ModelRoute>,
}

impl Default for RouteTable {
    fn default() -> Self {
        use Provider::*;
        use RequestShape::*;
        Self {
            routes: vec![
                ModelRoute::new("gpt-3.5-turbo-instruct", OpenAi, Completion),
                ModelRoute::new("davinci", OpenAi, Completion),
                ModelRoute::new("babbage", OpenAi, Completion),
                ModelRoute::new("gpt-", OpenAi, Chat),
                ModelRoute::new("o1", OpenAi, Chat),
                ModelRoute::new("o3", OpenAi, Chat),
                ModelRoute::new("o4", OpenAi, Chat),
                ModelRoute::new("claude-", Anthropic, AnthropicMessages),
                ModelRoute::new("anthropic.", Bedrock, AnthropicMessages),
                ModelRoute::new("amazon.titan-", Bedrock, TitanText),
                ModelRoute::new("meta.llama", Bedrock, LlamaPrompt),
            ],
        }
    }
}

impl RouteTable {
    /// Default routes plus `extra`; an extra route replaces a default with the
    /// same prefix.
    pub fn with_routes(extra: &[ModelRoute]) -> Self {
        let mut table = Self::default();
        for r in extra {
            table.routes.retain(|existing| existing.prefix != r.prefix);
            table.routes.push(r.clone());
        }
        table
    }

    pub fn resolve(&self, model_id: &str) -> Result<&ModelRoute, BenchError> {
        self.routes
            .iter()
            .filter(|r| model_id.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .ok_or_else(|| {
                BenchError::invocation(
                    model_id,
                    InvocationFault::UnknownModel,
                    "no provider route matches this model id",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let t = RouteTable::default();
        let r = t.resolve("gpt-3.5-turbo-instruct").unwrap();
        assert_eq!(r.shape, RequestShape::Completion);
        let r = t.resolve("gpt-4o-mini").unwrap();
        assert_eq!(r.shape, RequestShape::Chat);
        let r = t.resolve("anthropic.claude-3-haiku-20240307-v1:0").unwrap();
        assert_eq!(
            (r.provider, r.shape),
            (Provider::Bedrock, RequestShape::AnthropicMessages)
        );
        assert_eq!(
            t.resolve("meta.llama3-70b-instruct-v1:0").unwrap().shape,
            RequestShape::LlamaPrompt
        );
    }

    #[test]
    fn test_unknown_model_is_config_fatal() {
        let err = RouteTable::default().resolve("mystery-1").unwrap_err();
        assert!(err.is_config_fatal());
    }

    #[test]
    fn test_extra_routes_extend_and_override() {
        let t = RouteTable::with_routes(&[
            ModelRoute::new("mistral.", Provider::Bedrock, RequestShape::LlamaPrompt),
            ModelRoute::new("gpt-", Provider::OpenAi, RequestShape::Completion),
        ]);
        assert_eq!(t.resolve("mistral.large").unwrap().provider, Provider::Bedrock);
        assert_eq!(t.resolve("gpt-4").unwrap().shape, RequestShape::Completion);
    }

    #[test]
    fn test_route_config_yaml() {
        let r: RouteConfig =
            serde_yaml::from_str("prefix: local-\nprovider: openai\nshape: chat\n").unwrap();
        assert_eq!(r.provider, Provider::OpenAi);
        assert_eq!(r.shape, RequestShape::Chat);
    }

    #[test]
    fn test_bodies_and_unwrapping_per_shape() {
        let p = GenerationParams::default();
        let b = RequestShape::AnthropicMessages.body(Provider::Bedrock, "anthropic.x", "hi", &p);
        assert_eq!(b["anthropic_version"], BEDROCK_ANTHROPIC_VERSION);
        assert!(b.get("model").is_none());
        assert_eq!(b["top_k"], 2);
        let b = RequestShape::AnthropicMessages.body(Provider::Anthropic, "claude-x", "hi", &p);
        assert_eq!(b["model"], "claude-x");

        let b = RequestShape::TitanText.body(Provider::Bedrock, "amazon.titan-text", "hi", &p);
        assert_eq!(b["inputText"], "hi");
        assert_eq!(b["textGenerationConfig"]["maxTokenCount"], 1024);
        assert_eq!(b["textGenerationConfig"]["topK"], 2);
        let no_k = GenerationParams {
            top_k: None,
            ..GenerationParams::default()
        };
        let b = RequestShape::TitanText.body(Provider::Bedrock, "amazon.titan-text", "hi", &no_k);
        assert!(b["textGenerationConfig"].get("topK").is_none());

        assert_eq!(
            RequestShape::TitanText.path(Provider::Bedrock, "amazon.titan-text"),
            "/model/amazon.titan-text/invoke"
        );
        assert_eq!(
            RequestShape::Completion.path(Provider::OpenAi, "davinci-002"),
            "/v1/completions"
        );
        assert_eq!(
            RequestShape::AnthropicMessages.path(Provider::Anthropic, "claude-x"),
            "/v1/messages"
        );

        let resp = json!({"choices": [{"message": {"content": "SELECT 1"}}]});
        assert_eq!(RequestShape::Chat.extract_text(&resp), Some("SELECT 1"));
        assert_eq!(RequestShape::Completion.extract_text(&resp), None);
        let resp = json!({"results": [{"outputText": "SELECT 2"}]});
        assert_eq!(RequestShape::TitanText.extract_text(&resp), Some("SELECT 2"));
        let resp = json!({"generation": "SELECT 3"});
        assert_eq!(RequestShape::LlamaPrompt.extract_text(&resp), Some("SELECT 3"));
    }
}
