use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model resolution failed: {0}")]
    Registry(#[from] weave_model_registry::RegistryError),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {0} returned no choices")]
    NoChoices(String),

    #[error("environment variable {0} naming the API key is not set")]
    MissingApiKeyEnv(String),

    #[error("provider {0} returned HTTP {1}: {2}")]
    UpstreamStatus(String, u16, String),

    #[error("stream channel closed before Done was emitted")]
    StreamClosed,
}
