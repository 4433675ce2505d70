//! The model registry: providers, roles, and the model-resolution precedence
//! chain used for explicit-model streaming calls.

use std::collections::HashMap;

use crate::error::RegistryError;
use crate::provider::Provider;
use crate::role::Role;
use crate::spec::ModelSpec;

/// A resolved (provider, model, params) tuple ready to hand to the router.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub provider: Provider,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Providers, roles, an optional model→provider map (for explicit routing
/// such as OpenRouter-style prefixed names), and cached token-limit specs.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    providers: Vec<Provider>,
    roles: HashMap<String, Role>,
    /// Maps a model alias or exact model string to a provider name.
    model_map: HashMap<String, String>,
    model_specs: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role.name.clone(), role);
        self
    }

    pub fn with_model_map_entry(mut self, model: impl Into<String>, provider_name: impl Into<String>) -> Self {
        self.model_map.insert(model.into(), provider_name.into());
        self
    }

    pub fn with_model_spec(mut self, key: impl Into<String>, spec: ModelSpec) -> Self {
        self.model_specs.insert(key.into(), spec);
        self
    }

    pub fn provider_by_name(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn model_spec_for(&self, provider: &str, model: &str) -> Option<&ModelSpec> {
        self.model_specs.get(&format!("{provider}/{model}"))
    }

    /// Resolves a named role to its bound provider and model.
    pub fn resolve_role(&self, role_name: &str) -> Result<ResolvedModel, RegistryError> {
        let role = self
            .roles
            .get(role_name)
            .ok_or_else(|| RegistryError::UnknownRole(role_name.to_string()))?;
        let provider = self
            .provider_by_name(&role.provider)
            .filter(|p| p.enabled)
            .ok_or_else(|| RegistryError::RoleProviderMissing {
                role: role_name.to_string(),
                provider: role.provider.clone(),
            })?;
        Ok(ResolvedModel {
            provider: provider.clone(),
            model: role.model.clone(),
            max_tokens: role.max_tokens,
            temperature: role.temperature,
        })
    }

    /// Resolves an explicit model string (optionally with a provider hint)
    /// to a provider, following this precedence:
    ///
    /// 1. explicit alias (`provider_hint` names an enabled provider)
    /// 2. model-config map (`model` is a key in the model→provider map)
    /// 3. role table (`model` is actually a role name)
    /// 4. provider-name prefix of the model string (`"anthropic/claude-3"`)
    /// 5. first enabled non-OpenRouter provider whose name matches the prefix
    /// 6. OpenRouter fallback (a provider literally named `openrouter`)
    /// 7. first enabled provider
    pub fn resolve_explicit(
        &self,
        model: &str,
        provider_hint: Option<&str>,
    ) -> Result<ResolvedModel, RegistryError> {
        if let Some(hint) = provider_hint {
            if let Some(provider) = self.provider_by_name(hint) {
                if provider.enabled {
                    return Ok(ResolvedModel {
                        provider: provider.clone(),
                        model: model.to_string(),
                        max_tokens: None,
                        temperature: None,
                    });
                }
            }
        }

        if let Some(provider_name) = self.model_map.get(model) {
            if let Some(provider) = self.provider_by_name(provider_name) {
                if provider.enabled {
                    return Ok(ResolvedModel {
                        provider: provider.clone(),
                        model: model.to_string(),
                        max_tokens: None,
                        temperature: None,
                    });
                }
            }
        }

        if let Ok(resolved) = self.resolve_role(model) {
            return Ok(resolved);
        }

        let prefix = model.split('/').next().unwrap_or(model);

        if let Some(provider) = self
            .providers
            .iter()
            .find(|p| p.enabled && !p.is_openrouter() && p.matches_prefix(prefix))
        {
            return Ok(ResolvedModel {
                provider: provider.clone(),
                model: model.to_string(),
                max_tokens: None,
                temperature: None,
            });
        }

        if let Some(provider) = self.providers.iter().find(|p| p.enabled && p.is_openrouter()) {
            return Ok(ResolvedModel {
                provider: provider.clone(),
                model: model.to_string(),
                max_tokens: None,
                temperature: None,
            });
        }

        if let Some(provider) = self.providers.iter().find(|p| p.enabled) {
            return Ok(ResolvedModel {
                provider: provider.clone(),
                model: model.to_string(),
                max_tokens: None,
                temperature: None,
            });
        }

        Err(RegistryError::NoProviderForModel(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::WireFormat;

    fn openai() -> Provider {
        Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY").with_tools(true)
    }

    fn anthropic() -> Provider {
        Provider::new("anthropic", WireFormat::AnthropicShaped, "https://api.anthropic.com", "ANTHROPIC_API_KEY").with_tools(true)
    }

    fn openrouter() -> Provider {
        Provider::new("openrouter", WireFormat::OpenAiShaped, "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY")
    }

    #[test]
    fn resolve_role_returns_bound_provider_and_model() {
        let registry = ModelRegistry::new()
            .with_provider(openai())
            .with_role(Role::new("embed", "openai", "text-embedding-3-small"));

        let resolved = registry.resolve_role("embed").unwrap();
        assert_eq!(resolved.provider.name, "openai");
        assert_eq!(resolved.model, "text-embedding-3-small");
    }

    #[test]
    fn resolve_role_unknown_is_error() {
        let registry = ModelRegistry::new();
        assert!(matches!(registry.resolve_role("nope"), Err(RegistryError::UnknownRole(_))));
    }

    #[test]
    fn explicit_alias_wins_over_everything() {
        let registry = ModelRegistry::new().with_provider(openai()).with_provider(anthropic());
        let resolved = registry.resolve_explicit("claude-3-opus", Some("anthropic")).unwrap();
        assert_eq!(resolved.provider.name, "anthropic");
    }

    #[test]
    fn model_map_is_checked_before_prefix() {
        let registry = ModelRegistry::new()
            .with_provider(openai())
            .with_provider(anthropic())
            .with_model_map_entry("my-custom-alias", "anthropic");

        let resolved = registry.resolve_explicit("my-custom-alias", None).unwrap();
        assert_eq!(resolved.provider.name, "anthropic");
    }

    #[test]
    fn role_name_resolves_via_role_table() {
        let registry = ModelRegistry::new()
            .with_provider(openai())
            .with_role(Role::new("summarize", "openai", "gpt-4o-mini"));

        let resolved = registry.resolve_explicit("summarize", None).unwrap();
        assert_eq!(resolved.provider.name, "openai");
        assert_eq!(resolved.model, "gpt-4o-mini");
    }

    #[test]
    fn prefix_match_picks_non_openrouter_provider() {
        let registry = ModelRegistry::new().with_provider(openai()).with_provider(anthropic());
        let resolved = registry.resolve_explicit("anthropic/claude-3-opus", None).unwrap();
        assert_eq!(resolved.provider.name, "anthropic");
    }

    #[test]
    fn falls_back_to_openrouter_when_no_prefix_match() {
        let registry = ModelRegistry::new().with_provider(openai()).with_provider(openrouter());
        let resolved = registry.resolve_explicit("some-vendor/weird-model", None).unwrap();
        assert_eq!(resolved.provider.name, "openrouter");
    }

    #[test]
    fn falls_back_to_first_enabled_provider_when_nothing_else_matches() {
        let registry = ModelRegistry::new().with_provider(openai());
        let resolved = registry.resolve_explicit("totally-unknown", None).unwrap();
        assert_eq!(resolved.provider.name, "openai");
    }

    #[test]
    fn disabled_provider_hint_falls_through_chain() {
        let disabled_anthropic = anthropic().with_enabled(false);
        let registry = ModelRegistry::new().with_provider(openai()).with_provider(disabled_anthropic);
        let resolved = registry.resolve_explicit("claude-3", Some("anthropic")).unwrap();
        assert_eq!(resolved.provider.name, "openai");
    }

    #[test]
    fn no_enabled_providers_is_error() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.resolve_explicit("anything", None),
            Err(RegistryError::NoProviderForModel(_))
        ));
    }
}
