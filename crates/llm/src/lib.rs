//! Protocol-translating proxy core.
//!
//! Requests arrive in the Anthropic Messages ("Claude") shape and are
//! dispatched to one of several upstream providers. Each provider adapter
//! translates the request body into the upstream's format and translates
//! the response — JSON or SSE stream — back into the Claude shape, so the
//! client sees one uniform API regardless of upstream.

use std::sync::Arc;

use axum::Router;

mod error;
mod messages;
mod provider;
mod proxy;
mod registry;
mod router;
mod stream;
pub mod token_counter;

pub use error::{LlmError, LlmResult};

/// Build the axum router exposing the proxy surface.
///
/// Every path is proxied; health and banner routes are the caller's
/// concern. Fails when a configured provider cannot be instantiated.
pub fn router(config: &config::Config) -> LlmResult<Router> {
    let registry = registry::ProviderRegistry::from_config(config)?;

    log::debug!("Initialized {} provider(s)", config.providers.len());

    let state = Arc::new(proxy::ProxyState {
        config: config.clone(),
        registry,
        client: proxy::upstream_client(),
    });

    Ok(Router::new().fallback(proxy::proxy).with_state(state))
}
