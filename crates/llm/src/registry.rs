use std::{collections::HashMap, sync::Arc};

use config::{Config, ProviderKind};

use crate::{
    error::{LlmError, LlmResult},
    provider::{
        Provider,
        anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_API_URL},
        gemini::{DEFAULT_GEMINI_API_URL, GeminiProvider},
        openai::{
            DEFAULT_NVIDIA_API_URL, DEFAULT_OPENAI_API_URL, DEFAULT_OPENROUTER_API_URL, OpenAiProvider,
        },
    },
};

/// Registry of adapter instances, keyed by provider name.
///
/// Populated once at process initialization; request-time lookups are
/// read-only.
pub(crate) struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Instantiate one adapter per configured provider.
    pub fn from_config(config: &Config) -> LlmResult<Self> {
        let mut registry = Self {
            providers: HashMap::with_capacity(config.providers.len()),
        };

        for (name, provider_config) in &config.providers {
            let Some(kind) = resolve_kind(name, provider_config) else {
                return Err(LlmError::Config(format!(
                    "Cannot determine the protocol for provider '{name}': set `type` or use a known endpoint"
                )));
            };

            let endpoint = provider_config.endpoint.as_ref().map(|url| url.to_string());
            log::debug!("Registering provider '{name}' as {kind}");

            let provider: Arc<dyn Provider> = match kind {
                ProviderKind::Openai => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    endpoint.unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string()),
                )),
                ProviderKind::Openrouter => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    endpoint.unwrap_or_else(|| DEFAULT_OPENROUTER_API_URL.to_string()),
                )),
                ProviderKind::Nvidia => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    endpoint.unwrap_or_else(|| DEFAULT_NVIDIA_API_URL.to_string()),
                )),
                ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                    name.clone(),
                    endpoint.unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string()),
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                    name.clone(),
                    endpoint.unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string()),
                )),
            };

            registry.register(provider);
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}

/// Determine a provider's protocol: an explicit `type` wins, then a name
/// that is itself a known kind, then the endpoint hostname.
fn resolve_kind(name: &str, config: &config::ProviderConfig) -> Option<ProviderKind> {
    config
        .kind
        .or_else(|| name.parse().ok())
        .or_else(|| config.endpoint.as_ref().and_then(|url| url.host_str()).and_then(kind_for_host))
}

/// Hostname → protocol inference, for configurations that supply only a raw
/// URL.
pub(crate) fn kind_for_host(host: &str) -> Option<ProviderKind> {
    match host {
        "openrouter.ai" | "api.openrouter.ai" => Some(ProviderKind::Openrouter),
        "api.openai.com" | "openai.com" => Some(ProviderKind::Openai),
        "api.anthropic.com" | "anthropic.com" => Some(ProviderKind::Anthropic),
        "integrate.api.nvidia.com" | "api.nvidia.com" => Some(ProviderKind::Nvidia),
        "generativelanguage.googleapis.com" | "googleapis.com" => Some(ProviderKind::Gemini),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn build(toml: &str) -> LlmResult<ProviderRegistry> {
        let config: Config = toml::from_str(toml).unwrap();
        ProviderRegistry::from_config(&config)
    }

    #[test]
    fn infers_kind_from_provider_name() {
        let registry = build(indoc! {r#"
            [providers.openrouter]
            api_key = "test"
        "#})
        .unwrap();

        let provider = registry.get("openrouter").unwrap();
        assert_eq!(provider.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn infers_kind_from_endpoint_hostname() {
        let registry = build(indoc! {r#"
            [providers.my-gateway]
            endpoint = "https://integrate.api.nvidia.com/v1/chat/completions"
            api_key = "test"
        "#})
        .unwrap();

        assert!(registry.get("my-gateway").is_some());
    }

    #[test]
    fn explicit_type_wins_over_everything() {
        let registry = build(indoc! {r#"
            [providers.openai]
            type = "gemini"
            api_key = "test"
        "#})
        .unwrap();

        let provider = registry.get("openai").unwrap();
        assert_eq!(provider.endpoint(), "https://generativelanguage.googleapis.com/v1beta/models");
    }

    #[test]
    fn unresolvable_kind_is_a_config_error() {
        let error = build(indoc! {r#"
            [providers.mystery]
            endpoint = "https://example.com/v1"
            api_key = "test"
        "#})
        .unwrap_err();

        assert!(matches!(error, LlmError::Config(_)));
    }

    #[test]
    fn endpoint_override_is_kept() {
        let registry = build(indoc! {r#"
            [providers.openai]
            endpoint = "https://proxy.internal/v1/chat/completions"
            type = "openai"
            api_key = "test"
        "#})
        .unwrap();

        let provider = registry.get("openai").unwrap();
        assert_eq!(provider.endpoint(), "https://proxy.internal/v1/chat/completions");
    }

    #[test]
    fn domain_table_covers_all_documented_hosts() {
        assert_eq!(kind_for_host("openrouter.ai"), Some(ProviderKind::Openrouter));
        assert_eq!(kind_for_host("api.openrouter.ai"), Some(ProviderKind::Openrouter));
        assert_eq!(kind_for_host("api.openai.com"), Some(ProviderKind::Openai));
        assert_eq!(kind_for_host("openai.com"), Some(ProviderKind::Openai));
        assert_eq!(kind_for_host("api.anthropic.com"), Some(ProviderKind::Anthropic));
        assert_eq!(kind_for_host("anthropic.com"), Some(ProviderKind::Anthropic));
        assert_eq!(kind_for_host("integrate.api.nvidia.com"), Some(ProviderKind::Nvidia));
        assert_eq!(kind_for_host("api.nvidia.com"), Some(ProviderKind::Nvidia));
        assert_eq!(kind_for_host("generativelanguage.googleapis.com"), Some(ProviderKind::Gemini));
        assert_eq!(kind_for_host("googleapis.com"), Some(ProviderKind::Gemini));
        assert_eq!(kind_for_host("example.com"), None);
    }
}
