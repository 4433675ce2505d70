//! Provider configuration: wire format, base URL, auth, and capability flags.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which of the two wire shapes a provider speaks. The router translates
/// between these and the unified request/response/stream-event types;
/// everything downstream of the router is wire-format agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    OpenAiShaped,
    AnthropicShaped,
}

/// Auth header style, overridable per provider. Defaults follow the wire
/// format (`Bearer` for OpenAI-shaped, `x-api-key` for Anthropic-shaped) when
/// a provider doesn't set one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    BearerHeader,
    ApiKeyHeader,
}

impl WireFormat {
    /// The auth style a provider gets unless it overrides one explicitly.
    pub fn default_auth_style(&self) -> AuthStyle {
        match self {
            WireFormat::OpenAiShaped => AuthStyle::BearerHeader,
            WireFormat::AnthropicShaped => AuthStyle::ApiKeyHeader,
        }
    }
}

/// A configured LLM backend: a base URL, a wire format, and where to read
/// its API key from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub wire_format: WireFormat,
    pub base_url: String,
    /// Environment variable naming the API key; resolved lazily by the
    /// router, never stored inline in config.
    pub api_key_env: String,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub auth_style: Option<AuthStyle>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub supports_tools: bool,
}

fn default_enabled() -> bool {
    true
}

impl Provider {
    pub fn new(name: impl Into<String>, wire_format: WireFormat, base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wire_format,
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            extra_headers: HashMap::new(),
            auth_style: None,
            enabled: true,
            supports_tools: false,
        }
    }

    pub fn with_tools(mut self, supports: bool) -> Self {
        self.supports_tools = supports;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn effective_auth_style(&self) -> AuthStyle {
        self.auth_style.unwrap_or_else(|| self.wire_format.default_auth_style())
    }

    /// The provider-name prefix a model string would use to route here,
    /// e.g. `"anthropic"` for `"anthropic/claude-3-opus"`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.name.eq_ignore_ascii_case(prefix)
    }

    /// Well-known name for the OpenRouter fallback provider in the precedence chain.
    pub const OPENROUTER_NAME: &'static str = "openrouter";

    pub fn is_openrouter(&self) -> bool {
        self.name.eq_ignore_ascii_case(Self::OPENROUTER_NAME)
    }
}
