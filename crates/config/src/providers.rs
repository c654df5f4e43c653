use std::{borrow::Cow, fmt, str::FromStr};

use regex::{Regex, RegexBuilder};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use url::Url;

/// The wire protocol an upstream provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions.
    Openai,
    /// OpenRouter (OpenAI-compatible).
    Openrouter,
    /// NVIDIA NIM (OpenAI-compatible).
    Nvidia,
    /// Google Gemini generateContent.
    Gemini,
    /// Native Anthropic Messages.
    Anthropic,
}

impl ProviderKind {
    /// Canonical lowercase name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Openrouter => "openrouter",
            Self::Nvidia => "nvidia",
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "openrouter" => Ok(Self::Openrouter),
            "nvidia" => Ok(Self::Nvidia),
            "gemini" => Ok(Self::Gemini),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown provider kind '{other}'")),
        }
    }
}

/// Configuration for a single upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Explicit protocol kind. When unset, the kind is inferred from the
    /// provider name or the endpoint hostname.
    #[serde(rename = "type", default)]
    pub kind: Option<ProviderKind>,

    /// Endpoint override. Each kind carries its own default.
    #[serde(default)]
    pub endpoint: Option<Url>,

    /// Credential for this provider. `CCO_API_KEY` fills this in when unset.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Allowed-model whitelist patterns. Empty means every model is allowed.
    #[serde(default)]
    pub models: Vec<ModelFilter>,

    /// Models advertised for this provider when a client asks what to use.
    #[serde(default)]
    pub default_models: Vec<String>,
}

impl ProviderConfig {
    /// Whether the whitelist admits the given model name.
    pub fn allows_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|filter| filter.is_match(model))
    }
}

/// Case-insensitive regex filter for matching model identifiers.
#[derive(Clone)]
pub struct ModelFilter {
    regex: Regex,
}

impl ModelFilter {
    fn new(pattern: &str) -> Result<Self, String> {
        let trimmed = pattern.trim();

        if trimmed.is_empty() {
            return Err("model pattern cannot be empty".to_string());
        }

        let regex = RegexBuilder::new(trimmed)
            .case_insensitive(true)
            .build()
            .map_err(|err| format!("invalid model pattern: {err}"))?;

        Ok(Self { regex })
    }

    /// Return the original pattern string.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Check whether the supplied model identifier matches the pattern.
    pub fn is_match(&self, model: &str) -> bool {
        self.regex.is_match(model)
    }
}

impl fmt::Debug for ModelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFilter").field("pattern", &self.pattern()).finish()
    }
}

impl<'de> Deserialize<'de> for ModelFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern = Cow::<'de, str>::deserialize(deserializer)?;
        ModelFilter::new(pattern.as_ref()).map_err(serde::de::Error::custom)
    }
}
