use std::path::Path;

use anyhow::{Context, bail};
use secrecy::SecretString;

use crate::Config;

/// Values picked up from the process environment that override or complete
/// the file-based configuration.
#[derive(Debug, Default)]
pub struct Overrides {
    /// Replaces `server.host`.
    pub host: Option<String>,
    /// Replaces `server.port`.
    pub port: Option<u16>,
    /// Fallback credential for providers that have none configured.
    pub api_key: Option<SecretString>,
}

impl Overrides {
    /// Read overrides from `CCO_HOST`, `CCO_PORT` and `CCO_API_KEY`.
    pub fn from_env() -> Self {
        let port = std::env::var("CCO_PORT").ok().and_then(|raw| match raw.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                log::warn!("Ignoring CCO_PORT: '{raw}' is not a valid port number");
                None
            }
        });

        Self {
            host: std::env::var("CCO_HOST").ok(),
            port,
            api_key: std::env::var("CCO_API_KEY").ok().map(SecretString::from),
        }
    }

    /// Apply the overrides to a parsed configuration.
    pub fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }

        if let Some(port) = self.port {
            config.server.port = port;
        }

        if let Some(api_key) = self.api_key {
            for (name, provider) in config.providers.iter_mut() {
                if provider.api_key.is_none() {
                    log::debug!("Provider '{name}' has no credential configured, using CCO_API_KEY");
                    provider.api_key = Some(api_key.clone());
                }
            }
        }
    }
}

pub(crate) fn load(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    Overrides::from_env().apply(&mut config);
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.providers.is_empty() {
        bail!(indoc::indoc! {r#"
            No upstream providers configured. cco requires at least one provider to route to.

            Example configuration:

              [providers.openrouter]
              api_key = "sk-or-..."

              [router]
              default = "openrouter,anthropic/claude-3.5-sonnet"
        "#});
    }

    let Some(default) = &config.router.default else {
        bail!("The router policy requires a `default` target, e.g. default = \"openai,gpt-4o\"");
    };

    for (field, target) in [
        ("default", Some(default)),
        ("think", config.router.think.as_ref()),
        ("long_context", config.router.long_context.as_ref()),
        ("background", config.router.background.as_ref()),
        ("web_search", config.router.web_search.as_ref()),
    ] {
        let Some(target) = target else { continue };

        if target.model().is_empty() {
            bail!(
                "Router target `{field}` must be of the form \"provider,model\", got '{}'",
                target.as_str()
            );
        }

        if !config.providers.contains_key(target.provider()) {
            bail!(
                "Router target `{field}` names unknown provider '{}'",
                target.provider()
            );
        }
    }

    Ok(())
}
