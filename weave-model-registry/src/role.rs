//! Role table: logical names (embed, summarize, synthesizer, ...) bound to a
//! concrete (provider, model, params) tuple.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Role {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Well-known role names the orchestrator binds by convention.
pub mod well_known {
    pub const EMBED: &str = "embed";
    pub const SUMMARIZE: &str = "summarize";
    pub const SYNTHESIZER: &str = "synthesizer";
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const REVIEWER: &str = "reviewer";
}
