use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use config::Config;

use crate::{
    error::{LlmError, LlmResult},
    provider::StreamState,
    registry::ProviderRegistry,
    router,
    stream::claude_sse_stream,
};

/// Shared, read-only state for the proxy surface.
pub(crate) struct ProxyState {
    pub config: Config,
    pub registry: ProviderRegistry,
    pub client: reqwest::Client,
}

/// One client for all upstream calls, so connections are reused across
/// requests to the same provider.
///
/// There is no overall request deadline: a streaming completion can run
/// for many minutes, and the engine already closes the response when the
/// upstream socket dies. The connect phase gets its own bound, and TCP
/// keepalive covers the quiet stretches between SSE chunks of a slow
/// generation.
pub(crate) fn upstream_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .tcp_keepalive(Some(Duration::from_secs(30)))
                .pool_max_idle_per_host(8)
                .build()
                .expect("Failed to build upstream HTTP client")
        })
        .clone()
}

/// Entry point for every proxied request.
pub(crate) async fn proxy(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    match handle(state, request).await {
        Ok(response) => response,
        Err(error) => {
            log::error!("Request failed: {error}");
            error.into_response()
        }
    }
}

async fn handle(state: Arc<ProxyState>, request: Request) -> LlmResult<Response> {
    let (parts, body) = request.into_parts();

    // Bodies are bounded by LLM request sizes; buffering them whole keeps
    // routing and translation simple.
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|error| LlmError::Parse(format!("Failed to read request body: {error}")))?;

    let route = router::route(&body, &state.config)?;

    let Some(provider) = state.registry.get(&route.provider) else {
        return Err(LlmError::Config(format!("Provider '{}' is not registered", route.provider)));
    };

    let provider_config = state.config.providers.get(&route.provider);

    if let Some(provider_config) = provider_config
        && !provider_config.allows_model(&route.model)
    {
        return Err(LlmError::Config(format!(
            "Model '{}' is not in the allowed list for provider '{}'",
            route.model, route.provider
        )));
    }

    let credential = provider_config.and_then(|config| config.api_key.clone());

    if credential.is_none() {
        return Err(LlmError::Config(format!(
            "No credential configured for provider '{}'",
            route.provider
        )));
    }

    log::debug!(
        "Dispatching to {}/{} (stream requested: {})",
        route.provider,
        route.model,
        route.stream
    );

    // A request-side transform failure never reaches the upstream.
    let upstream_body = provider.transform_request(route.body)?;

    let url = provider.request_url(&route.model, route.stream);

    let mut builder = state.client.post(url);
    builder = forward_request_headers(builder, &parts.headers);
    builder = provider.apply_auth(builder, credential.as_ref());

    let upstream = builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(upstream_body)
        .send()
        .await
        .map_err(|error| LlmError::Transport(format!("Failed to reach upstream: {error}")))?;

    let status = upstream.status();

    if !status.is_success() {
        // Upstream errors are forwarded bit-exact, preserving whatever
        // detail the provider included. Never rewrap.
        log::debug!("Upstream answered {status}, forwarding verbatim");
        return forward_upstream_response(upstream).await;
    }

    if provider.supports_streaming() && provider.is_streaming(upstream.headers()) {
        let stream = claude_sse_stream(upstream.bytes_stream(), provider, StreamState::default());

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .map_err(|error| LlmError::Transform(format!("Failed to build streaming response: {error}")));
    }

    let upstream_bytes = upstream
        .bytes()
        .await
        .map_err(|error| LlmError::Transport(format!("Failed to read upstream body: {error}")))?;

    match provider.transform_response(&upstream_bytes) {
        Ok(translated) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(translated))
            .map_err(|error| LlmError::Transform(format!("Failed to build response: {error}"))),
        Err(error) => {
            // The original upstream bytes carry more signal than any
            // rewrapped error; forward them under a 500.
            log::error!("Failed to transform upstream response, forwarding original bytes: {error}");

            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(upstream_bytes))
                .map_err(|error| LlmError::Transform(format!("Failed to build response: {error}")))
        }
    }
}

/// Headers the proxy owns or that must not travel upstream: the credential
/// headers are rewritten per provider, and encoding negotiation belongs to
/// the upstream HTTP client.
const SKIPPED_REQUEST_HEADERS: &[header::HeaderName] = &[
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::CONTENT_ENCODING,
    header::ACCEPT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::AUTHORIZATION,
];

fn forward_request_headers(mut builder: reqwest::RequestBuilder, headers: &HeaderMap) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        if SKIPPED_REQUEST_HEADERS.contains(name) || name.as_str() == "x-api-key" {
            continue;
        }

        builder = builder.header(name, value);
    }

    builder
}

async fn forward_upstream_response(upstream: reqwest::Response) -> LlmResult<Response> {
    let status = upstream.status();

    let mut builder = Response::builder().status(status);

    const SKIPPED_RESPONSE_HEADERS: &[header::HeaderName] = &[
        header::CONTENT_LENGTH,
        header::CONTENT_ENCODING,
        header::TRANSFER_ENCODING,
        header::CONNECTION,
    ];

    for (name, value) in upstream.headers() {
        // The body below is already decompressed and re-framed.
        if SKIPPED_RESPONSE_HEADERS.contains(name) {
            continue;
        }

        builder = builder.header(name, value);
    }

    let body = upstream
        .bytes()
        .await
        .map_err(|error| LlmError::Transport(format!("Failed to read upstream error body: {error}")))?;

    builder
        .body(Body::from(body))
        .map_err(|error| LlmError::Transform(format!("Failed to build forwarded response: {error}")))
}
