use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::{
    error::{LlmError, LlmResult},
    messages::{
        claude::{
            ContentBlock, ContentDelta, MessageDelta, MessageStart, MessagesResponse, StreamEvent, Usage,
        },
        openai::{ChatCompletionChunk, ChatCompletionResponse, StreamingToolCall},
    },
    provider::{
        ContentBlockState, Provider, StreamState,
        shared::{
            claude_tool_id, frame_events, openai_stop_reason, openai_tool_id, parse_tool_arguments,
            usage_from_openai,
        },
    },
};

pub(crate) const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub(crate) const DEFAULT_OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub(crate) const DEFAULT_NVIDIA_API_URL: &str = "https://integrate.api.nvidia.com/v1/chat/completions";

/// Adapter for OpenAI-compatible chat-completions upstreams. One instance
/// per registered provider; OpenAI, OpenRouter and NVIDIA all speak this
/// dialect and differ only in endpoint and name.
pub(crate) struct OpenAiProvider {
    name: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    fn process_tool_call(call: &StreamingToolCall, state: &mut StreamState, events: &mut Vec<StreamEvent>) {
        let function = call.function.as_ref();
        let name = function.and_then(|f| f.name.as_deref());
        let arguments = function.and_then(|f| f.arguments.as_deref());
        let call_id = call.id.as_deref().filter(|id| !id.is_empty());

        // Continuation chunks usually omit the id, so the array index is the
        // primary key; the id is the fallback, and a fresh id allocates a
        // new block at the next free output index.
        let block_index = call
            .index
            .and_then(|tool_index| state.block_by_tool_index(tool_index))
            .or_else(|| call_id.and_then(|id| state.block_by_tool_id(id)))
            .or_else(|| {
                call_id.map(|_| {
                    let index = state.next_block_index();
                    let mut block = ContentBlockState::tool_use();
                    block.tool_call_index = call.index;
                    state.content_blocks.insert(index, block);
                    index
                })
            });

        let Some(block_index) = block_index else {
            log::warn!("Dropping tool-call fragment with no id and no known index");
            return;
        };

        let Some(block) = state.content_blocks.get_mut(&block_index) else {
            return;
        };

        if let Some(id) = call_id
            && block.tool_call_id.is_none()
        {
            block.tool_call_id = Some(id.to_string());
        }

        if block.tool_call_index.is_none() {
            block.tool_call_index = call.index;
        }

        if let Some(name) = name {
            block.tool_name = Some(name.to_string());
        }

        if !block.start_sent
            && let (Some(id), Some(name)) = (&block.tool_call_id, &block.tool_name)
        {
            events.push(StreamEvent::ContentBlockStart {
                index: block_index,
                content_block: ContentBlock::ToolUse {
                    id: claude_tool_id(id),
                    name: name.clone(),
                    input: json!({}),
                },
            });
            block.start_sent = true;
        }

        if let Some(arguments) = arguments
            && arguments != block.arguments.as_str()
        {
            // Upstreams disagree on delta style: some resend the cumulative
            // argument string on every chunk, some send incremental slices.
            // A prefix match means cumulative; anything else is a slice.
            let delta = if arguments.starts_with(block.arguments.as_str()) {
                let delta = arguments[block.arguments.len()..].to_string();
                block.arguments = arguments.to_string();
                delta
            } else {
                block.arguments.push_str(arguments);
                arguments.to_string()
            };

            if !delta.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: ContentDelta::InputJsonDelta { partial_json: delta },
                });
            }
        }
    }
}

impl Provider for OpenAiProvider {
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
        match credential {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn transform_request(&self, body: Bytes) -> LlmResult<Bytes> {
        let mut request: Value = serde_json::from_slice(&body)
            .map_err(|error| LlmError::Parse(format!("Invalid request body: {error}")))?;

        {
            let Some(root) = request.as_object_mut() else {
                return Err(LlmError::Transform("Request body must be a JSON object".to_string()));
            };

            // Request metadata only survives for stored completions.
            let store = root.get("store").and_then(Value::as_bool).unwrap_or(false);
            if !store {
                root.remove("metadata");
            }

            if let Some(system) = root.remove("system") {
                let text = system_text(&system);

                if !text.is_empty() {
                    let message = json!({"role": "system", "content": text});

                    match root.get_mut("messages") {
                        Some(Value::Array(messages)) => messages.insert(0, message),
                        _ => {
                            root.insert("messages".to_string(), json!([message]));
                        }
                    }
                }
            }

            if let Some(max_tokens) = root.remove("max_tokens") {
                root.insert("max_completion_tokens".to_string(), max_tokens);
            }

            transform_tools(root);
            transform_messages(root);
        }

        strip_cache_control(&mut request);

        serde_json::to_vec(&request)
            .map(Bytes::from)
            .map_err(|error| LlmError::Transform(format!("Failed to serialize upstream request: {error}")))
    }

    fn transform_response(&self, body: &[u8]) -> LlmResult<Vec<u8>> {
        let response: ChatCompletionResponse = serde_json::from_slice(body)
            .map_err(|error| LlmError::Parse(format!("Invalid upstream response: {error}")))?;

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(LlmError::Transform("Upstream response has no choices".to_string()));
        };

        let mut content = Vec::new();

        if let Some(text) = &choice.message.content
            && !text.is_empty()
        {
            content.push(ContentBlock::Text { text: text.clone() });
        }

        for (position, call) in choice.message.tool_calls.iter().flatten().enumerate() {
            let id = match call.id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => claude_tool_id(id),
                None => format!("toolu_{position}"),
            };

            content.push(ContentBlock::ToolUse {
                id,
                name: call.function.name.clone().unwrap_or_default(),
                input: parse_tool_arguments(call.function.arguments.as_deref().unwrap_or("")),
            });
        }

        let mut extra = serde_json::Map::new();
        if let Some(annotations) = choice.message.annotations {
            extra.insert("annotations".to_string(), annotations);
        }

        let claude_response = MessagesResponse {
            id: response.id.unwrap_or_default(),
            r#type: "message".to_string(),
            role: "assistant".to_string(),
            model: response.model.unwrap_or_default(),
            content,
            stop_reason: Some(openai_stop_reason(choice.finish_reason.as_deref())),
            stop_sequence: None,
            usage: response.usage.as_ref().map(usage_from_openai).unwrap_or_default(),
            extra,
        };

        serde_json::to_vec(&claude_response)
            .map_err(|error| LlmError::Transform(format!("Failed to serialize response: {error}")))
    }

    fn transform_chunk(&self, data: &str, state: &mut StreamState) -> LlmResult<Vec<u8>> {
        let chunk: ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|error| LlmError::Parse(format!("Invalid stream chunk: {error}")))?;

        let mut events = Vec::new();

        if !state.message_start_sent {
            if let Some(id) = &chunk.id {
                state.message_id = id.clone();
            }
            if let Some(model) = &chunk.model {
                state.model = model.clone();
            }

            events.push(StreamEvent::MessageStart {
                message: MessageStart::new(state.message_id.as_str(), state.model.as_str()),
            });
            state.message_start_sent = true;
        }

        let usage = chunk.usage.as_ref().map(usage_from_openai);

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(frame_events(&events));
        };

        // Tool calls win over text when a chunk carries both.
        if let Some(tool_calls) = &choice.delta.tool_calls
            && !tool_calls.is_empty()
        {
            for call in tool_calls {
                Self::process_tool_call(call, state, &mut events);
            }
        } else if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            let index = state.text_block_index().unwrap_or_else(|| state.next_block_index());
            let block = state.content_blocks.entry(index).or_insert_with(ContentBlockState::text);

            if !block.start_sent {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text { text: String::new() },
                });
                block.start_sent = true;
            }

            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta { text: text.clone() },
            });
        }

        if let Some(finish_reason) = choice.finish_reason.as_deref() {
            events.extend(state.close_open_blocks());

            events.push(StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(openai_stop_reason(Some(finish_reason))),
                    stop_sequence: None,
                },
                usage,
            });
            events.push(StreamEvent::MessageStop);
            state.message_stop_sent = true;
        }

        Ok(frame_events(&events))
    }
}

fn system_text(system: &Value) -> String {
    match system {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Wrap Claude tool definitions in the OpenAI function envelope. Entries
/// already in that shape pass through. An empty or missing tool list also
/// drops `tool_choice`, which upstreams reject without tools.
fn transform_tools(root: &mut serde_json::Map<String, Value>) {
    let has_tools = match root.get_mut("tools") {
        Some(Value::Array(tools)) if !tools.is_empty() => {
            for tool in tools.iter_mut() {
                let already_wrapped =
                    tool.get("type").and_then(Value::as_str) == Some("function") && tool.get("function").is_some();

                if already_wrapped {
                    continue;
                }

                let Some(definition) = tool.as_object() else {
                    continue;
                };

                let mut function = serde_json::Map::new();

                if let Some(name) = definition.get("name") {
                    function.insert("name".to_string(), name.clone());
                }
                if let Some(description) = definition.get("description") {
                    function.insert("description".to_string(), description.clone());
                }
                if let Some(schema) = definition.get("input_schema") {
                    function.insert("parameters".to_string(), schema.clone());
                }

                *tool = json!({"type": "function", "function": function});
            }

            true
        }
        _ => false,
    };

    if !has_tools {
        root.remove("tools");
        root.remove("tool_choice");
    }
}

fn transform_messages(root: &mut serde_json::Map<String, Value>) {
    let Some(Value::Array(messages)) = root.get_mut("messages") else {
        return;
    };

    let mut transformed = Vec::with_capacity(messages.len());

    for message in std::mem::take(messages) {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let has_blocks = message.get("content").is_some_and(Value::is_array);

        match (role, has_blocks) {
            ("user", true) => explode_user_message(message, &mut transformed),
            ("assistant", true) => transformed.push(collapse_assistant_message(&message)),
            _ => transformed.push(message),
        }
    }

    *messages = transformed;
}

/// A user message carrying `tool_result` blocks becomes one `role: "tool"`
/// message per result; remaining text blocks stay behind as a user message.
fn explode_user_message(message: Value, out: &mut Vec<Value>) {
    let blocks = message
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let has_tool_results = blocks
        .iter()
        .any(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"));

    if !has_tool_results {
        out.push(message);
        return;
    }

    let mut texts = Vec::new();

    for block in &blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_result") => {
                let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or("");

                out.push(json!({
                    "role": "tool",
                    "tool_call_id": openai_tool_id(tool_use_id),
                    "content": tool_result_text(block.get("content")),
                }));
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            _ => {}
        }
    }

    if !texts.is_empty() {
        out.push(json!({"role": "user", "content": texts.join("\n")}));
    }
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|block| match block.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Collapse an assistant block sequence into a single content string, with
/// `tool_use` blocks carried as `tool_calls` entries.
fn collapse_assistant_message(message: &Value) -> Value {
    let blocks = message
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(part) = block.get("text").and_then(Value::as_str) {
                    text.push_str(part);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or("");
                let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = block
                    .get("input")
                    .map(|input| serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()))
                    .unwrap_or_else(|| "{}".to_string());

                tool_calls.push(json!({
                    "id": openai_tool_id(id),
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }));
            }
            _ => {}
        }
    }

    let mut result = serde_json::Map::new();
    result.insert("role".to_string(), json!("assistant"));
    result.insert(
        "content".to_string(),
        if text.is_empty() { Value::Null } else { Value::String(text) },
    );

    if !tool_calls.is_empty() {
        result.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    Value::Object(result)
}

fn strip_cache_control(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("cache_control");

            for nested in map.values_mut() {
                strip_cache_control(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_cache_control(item);
            }
        }
        _ => {}
    }
}
