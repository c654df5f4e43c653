//! Configuration for the cco proxy.
//!
//! The configuration is loaded once at startup and treated as a read-only
//! snapshot for the lifetime of the process. Requests in flight never observe
//! a partially updated configuration.

#![deny(missing_docs)]

mod loader;
mod providers;
mod router;
mod server;

pub use loader::Overrides;
pub use providers::{ModelFilter, ProviderConfig, ProviderKind};
pub use router::{RouteTarget, RouterConfig};
pub use server::ServerConfig;

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

/// Root configuration snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listener and proxy-level settings.
    pub server: ServerConfig,

    /// Upstream providers, in declaration order.
    pub providers: IndexMap<String, ProviderConfig>,

    /// Routing policy mapping request heuristics to `provider,model` targets.
    pub router: RouterConfig,
}

impl Config {
    /// Load the configuration from a TOML file and apply environment
    /// overrides (`CCO_HOST`, `CCO_PORT`, `CCO_API_KEY`).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        loader::load(path.as_ref())
    }

    /// Whether any upstream provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }
}
