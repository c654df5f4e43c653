use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6970;

/// Listener and proxy-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host the listener binds to.
    pub host: String,

    /// Port the listener binds to.
    pub port: u16,

    /// Shared key clients must present. When unset, all requests pass.
    pub proxy_key: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            proxy_key: None,
        }
    }
}

impl ServerConfig {
    /// Resolve the configured host and port into a socket address.
    pub fn listen_address(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve listen address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address resolved for {}:{}", self.host, self.port))
    }
}
