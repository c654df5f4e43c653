//! Provider adapters: bidirectional format translation between the Claude
//! shape and each upstream's wire format.

pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod openai;
pub(crate) mod shared;

use std::collections::BTreeMap;

use bytes::Bytes;
use http::HeaderMap;
use secrecy::SecretString;

use crate::error::LlmResult;

/// The capability set every upstream adapter implements.
///
/// Adapters are immutable after registration: per-request credentials are
/// passed into `apply_auth`, never stored, so a single adapter instance is
/// safe to share across concurrent requests.
pub trait Provider: Send + Sync {
    /// Registered provider name.
    fn name(&self) -> &str;

    /// Base endpoint URL, after any configuration override.
    fn endpoint(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Decide from upstream response headers whether the body is an SSE
    /// stream.
    fn is_streaming(&self, headers: &HeaderMap) -> bool {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("text/event-stream") {
            return true;
        }

        let chunked = headers
            .get(http::header::TRANSFER_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("chunked"));

        chunked && !content_type.starts_with("application/json")
    }

    /// The concrete URL for one upstream call. Most providers post to a
    /// fixed endpoint; Gemini appends the model and method.
    fn request_url(&self, _model: &str, _streaming: bool) -> String {
        self.endpoint().to_string()
    }

    /// Attach the upstream credential to an outgoing request.
    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
        credential: Option<&SecretString>,
    ) -> reqwest::RequestBuilder;

    /// Translate a Claude-shape request body into the upstream's format.
    /// The Anthropic adapter returns the input bytes unchanged.
    fn transform_request(&self, body: Bytes) -> LlmResult<Bytes>;

    /// Translate a non-streaming upstream response body into the Claude
    /// shape.
    fn transform_response(&self, body: &[u8]) -> LlmResult<Vec<u8>>;

    /// Translate one upstream SSE chunk (the JSON payload, `data: ` framing
    /// already stripped) into zero or more fully framed Claude SSE events.
    fn transform_chunk(&self, data: &str, state: &mut StreamState) -> LlmResult<Vec<u8>>;
}

/// Per-response translation state for a streaming upstream.
///
/// Owned exclusively by the task driving one response; never shared.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Whether `message_start` has been emitted.
    pub message_start_sent: bool,

    /// Whether `message_stop` has been emitted. The streaming engine
    /// synthesizes one on `[DONE]` if the adapter never got a finish reason.
    pub message_stop_sent: bool,

    /// Message id latched from the first upstream chunk that carries one.
    pub message_id: String,

    /// Model name latched from the first upstream chunk that carries one.
    pub model: String,

    /// Content blocks by output index. Indices are allocated as the map
    /// size at creation time and never reused within a response.
    pub content_blocks: BTreeMap<u64, ContentBlockState>,
}

impl StreamState {
    /// Index a newly created block will claim.
    pub fn next_block_index(&self) -> u64 {
        self.content_blocks.len() as u64
    }

    /// Find a tool block by the upstream tool-call array index.
    pub fn block_by_tool_index(&self, tool_index: u64) -> Option<u64> {
        self.content_blocks
            .iter()
            .find(|(_, block)| block.tool_call_index == Some(tool_index))
            .map(|(index, _)| *index)
    }

    /// Find a tool block by the upstream-assigned tool-call id.
    pub fn block_by_tool_id(&self, tool_id: &str) -> Option<u64> {
        self.content_blocks
            .iter()
            .find(|(_, block)| block.tool_call_id.as_deref() == Some(tool_id))
            .map(|(index, _)| *index)
    }

    /// Index of the response's text block, if one exists. Text normally
    /// claims index 0, but never steals an index a tool block owns.
    pub fn text_block_index(&self) -> Option<u64> {
        self.content_blocks
            .iter()
            .find(|(_, block)| block.kind == BlockKind::Text)
            .map(|(index, _)| *index)
    }

    /// Emit `content_block_stop` for every started, unstopped block, in
    /// index order.
    pub fn close_open_blocks(&mut self) -> Vec<crate::messages::claude::StreamEvent> {
        let mut events = Vec::new();

        for (index, block) in self.content_blocks.iter_mut() {
            if block.start_sent && !block.stop_sent {
                events.push(crate::messages::claude::StreamEvent::ContentBlockStop { index: *index });
                block.stop_sent = true;
            }
        }

        events
    }
}

/// Lifecycle state of one content block within a streaming response.
#[derive(Debug)]
pub struct ContentBlockState {
    pub kind: BlockKind,
    pub start_sent: bool,
    pub stop_sent: bool,
    pub tool_call_id: Option<String>,
    pub tool_call_index: Option<u64>,
    pub tool_name: Option<String>,
    /// Full concatenated JSON-argument string observed so far.
    pub arguments: String,
}

impl ContentBlockState {
    pub fn text() -> Self {
        Self {
            kind: BlockKind::Text,
            start_sent: false,
            stop_sent: false,
            tool_call_id: None,
            tool_call_index: None,
            tool_name: None,
            arguments: String::new(),
        }
    }

    pub fn tool_use() -> Self {
        Self {
            kind: BlockKind::ToolUse,
            ..Self::text()
        }
    }
}

/// Kind of content block a stream can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_indices_grow_with_the_map() {
        let mut state = StreamState::default();
        assert_eq!(state.next_block_index(), 0);

        state.content_blocks.insert(0, ContentBlockState::text());
        assert_eq!(state.next_block_index(), 1);

        let mut tool = ContentBlockState::tool_use();
        tool.tool_call_index = Some(0);
        tool.tool_call_id = Some("call_X".to_string());
        state.content_blocks.insert(1, tool);

        assert_eq!(state.block_by_tool_index(0), Some(1));
        assert_eq!(state.block_by_tool_id("call_X"), Some(1));
        assert_eq!(state.block_by_tool_id("call_Y"), None);
    }

    #[test]
    fn close_open_blocks_skips_unstarted_and_stopped() {
        let mut state = StreamState::default();

        let mut started = ContentBlockState::text();
        started.start_sent = true;
        state.content_blocks.insert(0, started);

        state.content_blocks.insert(1, ContentBlockState::tool_use());

        let mut stopped = ContentBlockState::tool_use();
        stopped.start_sent = true;
        stopped.stop_sent = true;
        state.content_blocks.insert(2, stopped);

        let events = state.close_open_blocks();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            crate::messages::claude::StreamEvent::ContentBlockStop { index: 0 }
        ));

        // A second pass has nothing left to close.
        assert!(state.close_open_blocks().is_empty());
    }
}
