use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::LlmResult,
    provider::{Provider, StreamState},
};

pub(crate) const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Identity adapter for native Anthropic upstreams.
///
/// Requests and responses are already in the Claude shape, so both
/// directions pass bytes through untouched. It exists so the router's
/// contract is uniform across providers.
pub(crate) struct AnthropicProvider {
    name: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
        credential: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);

        match credential {
            Some(key) => builder.header("x-api-key", key.expose_secret()),
            None => builder,
        }
    }

    fn transform_request(&self, body: Bytes) -> LlmResult<Bytes> {
        Ok(body)
    }

    fn transform_response(&self, body: &[u8]) -> LlmResult<Vec<u8>> {
        Ok(body.to_vec())
    }

    fn transform_chunk(&self, data: &str, state: &mut StreamState) -> LlmResult<Vec<u8>> {
        // Chunks pass through verbatim; only the lifecycle flags are
        // tracked so the engine knows not to synthesize a message_stop.
        #[derive(serde::Deserialize)]
        struct EventKind {
            r#type: String,
        }

        if let Ok(event) = serde_json::from_str::<EventKind>(data) {
            match event.r#type.as_str() {
                "message_start" => state.message_start_sent = true,
                "message_stop" => state.message_stop_sent = true,
                _ => {}
            }
        }

        Ok(format!("data: {data}\n").into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("anthropic", DEFAULT_ANTHROPIC_API_URL)
    }

    #[test]
    fn request_bytes_pass_through_byte_equal() {
        let body = Bytes::from_static(br#"{"model":"claude-3-5-sonnet","messages":[],  "max_tokens":1}"#);
        let out = provider().transform_request(body.clone()).unwrap();

        assert_eq!(out, body);
    }

    #[test]
    fn response_bytes_pass_through() {
        let body = br#"{"id":"msg_1","type":"message"}"#;
        assert_eq!(provider().transform_response(body).unwrap(), body);
    }

    #[test]
    fn chunks_pass_through_and_track_lifecycle() {
        let provider = provider();
        let mut state = StreamState::default();

        let out = provider
            .transform_chunk(r#"{"type":"message_start","message":{"id":"msg_1"}}"#, &mut state)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n"
        );
        assert!(state.message_start_sent);
        assert!(!state.message_stop_sent);

        provider.transform_chunk(r#"{"type":"message_stop"}"#, &mut state).unwrap();
        assert!(state.message_stop_sent);
    }
}
