use serde::Deserialize;
use serde_json::Value;

/// Non-streaming response body from an OpenAI-compatible chat completions
/// endpoint. Only the fields the translation needs are typed; providers in
/// this family (OpenAI, OpenRouter, NVIDIA) diverge on the rest.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub choices: Vec<ChatChoice>,

    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Web-search citation annotations, copied verbatim onto the Claude
    /// response.
    #[serde(default)]
    pub annotations: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,

    pub function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}

/// Usage block shared by responses and stream chunks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,

    #[serde(default)]
    pub completion_tokens: Option<u64>,

    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,

    /// Anthropic-style cache accounting some OpenAI-compatible providers
    /// forward as-is.
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,

    #[serde(default)]
    pub server_tool_use: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}

/// One chunk of an OpenAI-compatible SSE stream, after `data: ` framing has
/// been stripped.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

/// A tool-call fragment inside a stream chunk. The first fragment carries
/// `id` and the function name; continuations may carry only `index` and an
/// arguments slice.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingToolCall {
    #[serde(default)]
    pub index: Option<u64>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub function: Option<StreamingFunction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamingFunction {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}
