use serde::Deserialize;

/// Routing policy: each entry names a `provider,model` pair.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Unconditional terminal of the routing cascade.
    pub default: Option<RouteTarget>,

    /// Target for requests carrying a `thinking` configuration.
    pub think: Option<RouteTarget>,

    /// Target for requests whose body exceeds the long-context threshold.
    pub long_context: Option<RouteTarget>,

    /// Target for background-class models (`claude-3-5-haiku` prefix).
    pub background: Option<RouteTarget>,

    /// Target for requests carrying a web-search tool.
    pub web_search: Option<RouteTarget>,
}

/// A `provider,model` routing target. The split happens at the first comma,
/// so model names containing commas keep their suffix intact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RouteTarget(String);

impl RouteTarget {
    /// Provider part of the target.
    pub fn provider(&self) -> &str {
        self.0.split_once(',').map(|(provider, _)| provider).unwrap_or(&self.0)
    }

    /// Model part of the target. Empty when the target has no comma.
    pub fn model(&self) -> &str {
        self.0.split_once(',').map(|(_, model)| model).unwrap_or("")
    }

    /// The raw `provider,model` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RouteTarget {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn splits_target_at_first_comma() {
        let target = RouteTarget::from("openrouter,anthropic/claude-3.5-sonnet:online");

        assert_eq!(target.provider(), "openrouter");
        assert_eq!(target.model(), "anthropic/claude-3.5-sonnet:online");
    }

    #[test]
    fn parses_full_policy() {
        let config: RouterConfig = toml::from_str(indoc! {r#"
            default = "openrouter,anthropic/claude-3.5-sonnet"
            think = "openai,o1"
            long_context = "anthropic,claude-3-5-sonnet-20241022"
            background = "openai,gpt-4o-mini"
        "#})
        .unwrap();

        assert_eq!(config.default.unwrap().provider(), "openrouter");
        assert_eq!(config.think.unwrap().model(), "o1");
        assert!(config.web_search.is_none());
    }
}
