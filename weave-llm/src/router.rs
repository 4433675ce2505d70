//! Dispatches a resolved `(Provider, model)` pair to the matching wire
//! adapter. One task + one bounded channel per streaming call; cancelling
//! the caller's `CancellationToken` aborts the HTTP request and the
//! channel is closed after `Done` is emitted.

use tokio::sync::mpsc;
use weave_model_registry::{ModelRegistry, Provider, ResolvedModel, WireFormat};
use weave_stream::{StreamEvent, Usage};

use crate::error::LlmError;
use crate::message::CompletionRequest;
use crate::{anthropic_adapter, openai_adapter};

pub const STREAM_CHANNEL_CAPACITY: usize = 64;

pub struct CompletionOutcome {
    pub content: String,
    pub tool_calls: Vec<weave_stream::ToolCall>,
    pub usage: Option<Usage>,
}

pub struct Router {
    registry: ModelRegistry,
    http: reqwest::Client,
}

fn resolve_api_key(provider: &Provider) -> Result<String, LlmError> {
    std::env::var(&provider.api_key_env).map_err(|_| LlmError::MissingApiKeyEnv(provider.api_key_env.clone()))
}

/// Providers lacking tool support have their tool list stripped before the
/// request is built, rather than sent and silently ignored upstream.
fn strip_unsupported_tools(provider: &Provider, mut req: CompletionRequest) -> CompletionRequest {
    if !provider.supports_tools {
        req.tools = Vec::new();
    }
    req
}

impl Router {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub async fn complete_role(&self, role_name: &str, req: CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        let resolved = self.registry.resolve_role(role_name)?;
        self.complete_resolved(resolved, req).await
    }

    pub async fn complete_explicit(
        &self,
        model: &str,
        provider_hint: Option<&str>,
        req: CompletionRequest,
    ) -> Result<CompletionOutcome, LlmError> {
        let resolved = self.registry.resolve_explicit(model, provider_hint)?;
        self.complete_resolved(resolved, req).await
    }

    async fn complete_resolved(&self, resolved: ResolvedModel, req: CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        let api_key = resolve_api_key(&resolved.provider)?;
        let req = apply_role_defaults(req, &resolved);
        let req = strip_unsupported_tools(&resolved.provider, req);

        match resolved.provider.wire_format {
            WireFormat::OpenAiShaped => {
                let result = openai_adapter::complete(&self.http, &resolved.provider, &api_key, &resolved.model, &req).await?;
                Ok(CompletionOutcome {
                    content: result.content,
                    tool_calls: result.tool_calls,
                    usage: result.usage,
                })
            }
            WireFormat::AnthropicShaped => {
                let result = anthropic_adapter::complete(&self.http, &resolved.provider, &api_key, &resolved.model, &req).await?;
                Ok(CompletionOutcome {
                    content: result.content,
                    tool_calls: result.tool_calls,
                    usage: result.usage,
                })
            }
        }
    }

    pub fn stream_role(&self, role_name: &str, req: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let resolved = self.registry.resolve_role(role_name)?;
        self.stream_resolved(resolved, req)
    }

    pub fn stream_explicit(
        &self,
        model: &str,
        provider_hint: Option<&str>,
        req: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let resolved = self.registry.resolve_explicit(model, provider_hint)?;
        self.stream_resolved(resolved, req)
    }

    fn stream_resolved(&self, resolved: ResolvedModel, req: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let api_key = resolve_api_key(&resolved.provider)?;
        let req = apply_role_defaults(req, &resolved);
        let req = strip_unsupported_tools(&resolved.provider, req);
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        match resolved.provider.wire_format {
            WireFormat::OpenAiShaped => {
                openai_adapter::stream(self.http.clone(), resolved.provider, api_key, resolved.model, req, tx);
            }
            WireFormat::AnthropicShaped => {
                anthropic_adapter::stream(self.http.clone(), resolved.provider, api_key, resolved.model, req, tx);
            }
        }
        Ok(rx)
    }

    /// Embeds a batch of texts via the `embed` role. OpenAI-shaped only —
    /// the embeddings endpoint has no Anthropic-shaped equivalent.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let resolved = self.registry.resolve_role(weave_model_registry::well_known::EMBED)?;
        let api_key = resolve_api_key(&resolved.provider)?;

        let url = format!("{}/embeddings", resolved.provider.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": resolved.model,
            "input": texts,
        });
        let mut request = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body);
        for (key, value) in &resolved.provider.extra_headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::UpstreamStatus(resolved.provider.name.clone(), status, text));
        }

        let payload: serde_json::Value = response.json().await?;
        let vectors = payload["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|item| {
                        item["embedding"]
                            .as_array()
                            .map(|v| v.iter().filter_map(|n| n.as_f64()).map(|n| n as f32).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(vectors)
    }
}

fn apply_role_defaults(mut req: CompletionRequest, resolved: &ResolvedModel) -> CompletionRequest {
    if req.max_tokens.is_none() {
        req.max_tokens = resolved.max_tokens;
    }
    if req.temperature.is_none() {
        req.temperature = resolved.temperature;
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use weave_model_registry::{Provider, Role, WireFormat};

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_provider(Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY").with_tools(true))
            .with_role(Role::new(weave_model_registry::well_known::EMBED, "openai", "text-embedding-3-small"))
    }

    #[tokio::test]
    async fn missing_api_key_env_surfaces_as_error() {
        std::env::remove_var("OPENAI_API_KEY_FOR_TEST_ROUTER");
        let router = Router::new(
            ModelRegistry::new().with_provider(
                Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY_FOR_TEST_ROUTER")
                    .with_tools(true),
            ),
        );
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let err = router.complete_explicit("gpt-4o-mini", Some("openai"), req).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKeyEnv(_)));
    }

    #[test]
    fn apply_role_defaults_fills_unset_fields_only() {
        let resolved = ResolvedModel {
            provider: Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY"),
            model: "gpt-4o-mini".to_string(),
            max_tokens: Some(512),
            temperature: Some(0.2),
        };
        let req = CompletionRequest::new(vec![]).with_max_tokens(100);
        let req = apply_role_defaults(req, &resolved);
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.temperature, Some(0.2));
    }

    #[test]
    fn registry_roundtrip_resolves_embed_role() {
        let registry = registry();
        let resolved = registry.resolve_role(weave_model_registry::well_known::EMBED).unwrap();
        assert_eq!(resolved.provider.name, "openai");
    }
}
