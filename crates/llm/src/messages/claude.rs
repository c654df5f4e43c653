use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages API, as observed at the wire.
///
/// Recognized fields are typed; everything else is kept in `extra` so that
/// pass-through fields survive a round trip through the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// The requested model. May contain a comma for explicit
    /// `provider,model` routing.
    pub model: String,

    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,

    /// System prompt, separate from the messages array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tool definitions. Kept untyped: entries may already be in the
    /// OpenAI `{type: "function", function: {...}}` shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    /// Tool choice, only meaningful when `tools` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Unrecognized fields, forwarded as-is where the target format allows.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// System prompt: a plain string, or a sequence of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<Value>),
}

impl SystemPrompt {
    /// Flatten the prompt into a single string.
    pub fn as_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content: a bare string or an ordered sequence of content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One element of a message's structured content.
///
/// Unknown block types (images, thinking, documents) are captured whole in
/// `Other` so they survive deserialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },

    #[serde(untagged)]
    Other(Value),
}

/// Response body in the Claude shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesResponse {
    pub id: String,

    /// Always `"message"`.
    pub r#type: String,

    /// Always `"assistant"`.
    pub role: String,

    pub model: String,

    pub content: Vec<ContentBlock>,

    pub stop_reason: Option<StopReason>,

    pub stop_sequence: Option<String>,

    pub usage: Usage,

    /// Provider extras copied verbatim onto the response, e.g. web-search
    /// annotations.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Token usage statistics in the Claude shape.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    pub input_tokens: u64,

    pub output_tokens: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_tool_use: Option<Value>,
}

/// Error envelope in the Claude shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    pub r#type: String,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error: ErrorDetails {
                r#type: kind.into(),
                message: message.into(),
            },
        }
    }
}

/// Error details inside the envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetails {
    pub r#type: String,
    pub message: String,
}

/// Streaming event types for the Claude SSE sequence.
///
/// A conforming stream is `message_start`, then per content block a
/// `content_block_start` / deltas / `content_block_stop` group, then
/// `message_delta` and `message_stop`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },

    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: u64, content_block: ContentBlock },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u64, delta: ContentDelta },

    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u64 },

    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDelta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    #[serde(rename = "message_stop")]
    MessageStop,

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "error")]
    Error { error: ErrorDetails },
}

impl StreamEvent {
    /// The `event:` line name for SSE framing.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Initial message metadata carried by `message_start`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageStart {
    pub id: String,
    pub r#type: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Usage,
}

impl MessageStart {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            r#type: "message".to_string(),
            role: "assistant".to_string(),
            content: Vec::new(),
            model: model.into(),
            usage: Usage::default(),
        }
    }
}

/// Incremental update to a content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

/// Terminal metadata carried by `message_delta`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageDelta {
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
}
