use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::{
    error::{LlmError, LlmResult},
    messages::{
        claude::{
            ContentBlock, ContentDelta, ErrorResponse, Message, MessageContent, MessageDelta, MessageStart,
            MessagesRequest, MessagesResponse, Role, StreamEvent,
        },
        gemini::{
            Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateRequest, GenerateResponse,
            GenerationConfig, Part, SafetySetting, Tool,
        },
    },
    provider::{
        ContentBlockState, Provider, StreamState,
        shared::{frame_event, frame_events, gemini_error_kind, gemini_stop_reason, usage_from_gemini},
    },
};

pub(crate) const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Adapter for the Google Gemini generateContent API.
pub(crate) struct GeminiProvider {
    name: String,
    endpoint: String,
}

impl GeminiProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_url(&self, model: &str, streaming: bool) -> String {
        let base = self.endpoint.trim_end_matches('/');

        if streaming {
            format!("{base}/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/{model}:generateContent")
        }
    }

    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
        credential: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        match credential {
            Some(key) => builder.query(&[("key", key.expose_secret())]),
            None => builder,
        }
    }

    fn transform_request(&self, body: Bytes) -> LlmResult<Bytes> {
        let request: MessagesRequest = serde_json::from_slice(&body)
            .map_err(|error| LlmError::Parse(format!("Invalid request body: {error}")))?;

        let mut contents = Vec::new();

        // Gemini has no separate system slot in v1beta; the prompt leads the
        // conversation as a user turn.
        if let Some(system) = &request.system {
            let text = system.as_text();

            if !text.is_empty() {
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(text)],
                });
            }
        }

        for message in &request.messages {
            let role = match message.role {
                Role::Assistant => "model",
                Role::User => "user",
            };

            let parts = message_parts(message);

            if parts.is_empty() {
                continue;
            }

            contents.push(Content {
                role: Some(role.to_string()),
                parts,
            });
        }

        let generation_config = generation_config(&request);

        let tools = request.tools.as_deref().filter(|tools| !tools.is_empty()).map(|tools| {
            vec![Tool {
                function_declarations: tools.iter().filter_map(declaration_from_tool).collect(),
            }]
        });

        let gemini_request = GenerateRequest {
            contents,
            generation_config,
            safety_settings: SafetySetting::permissive(),
            tools,
        };

        serde_json::to_vec(&gemini_request)
            .map(Bytes::from)
            .map_err(|error| LlmError::Transform(format!("Failed to serialize upstream request: {error}")))
    }

    fn transform_response(&self, body: &[u8]) -> LlmResult<Vec<u8>> {
        // Gemini reports some failures in a 200 body carrying an error
        // status instead of a candidate list.
        if let Ok(error_body) = serde_json::from_slice::<crate::messages::gemini::ErrorBody>(body) {
            let envelope = ErrorResponse::new(gemini_error_kind(&error_body.error.status), error_body.error.message);

            return serde_json::to_vec(&envelope)
                .map_err(|error| LlmError::Transform(format!("Failed to serialize error envelope: {error}")));
        }

        let response: GenerateResponse = serde_json::from_slice(body)
            .map_err(|error| LlmError::Parse(format!("Invalid upstream response: {error}")))?;

        let Some(candidate) = response.candidates.into_iter().next() else {
            return Err(LlmError::Transform("Upstream response has no candidates".to_string()));
        };

        let mut content = Vec::new();

        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                content.push(ContentBlock::Text { text });
            }

            if let Some(call) = part.function_call {
                content.push(ContentBlock::ToolUse {
                    id: synthesized_tool_id(),
                    name: call.name,
                    input: call.args,
                });
            }

            if let Some(function_response) = part.function_response {
                content.push(ContentBlock::ToolResult {
                    tool_use_id: function_response.name,
                    content: function_response.response,
                });
            }
        }

        let claude_response = MessagesResponse {
            id: response.response_id.unwrap_or_default(),
            r#type: "message".to_string(),
            role: "assistant".to_string(),
            model: response.model_version.unwrap_or_default(),
            content,
            stop_reason: Some(gemini_stop_reason(candidate.finish_reason.as_deref())),
            stop_sequence: None,
            usage: response.usage_metadata.as_ref().map(usage_from_gemini).unwrap_or_default(),
            extra: serde_json::Map::new(),
        };

        serde_json::to_vec(&claude_response)
            .map_err(|error| LlmError::Transform(format!("Failed to serialize response: {error}")))
    }

    fn transform_chunk(&self, data: &str, state: &mut StreamState) -> LlmResult<Vec<u8>> {
        if let Ok(error_body) = serde_json::from_str::<crate::messages::gemini::ErrorBody>(data) {
            let event = StreamEvent::Error {
                error: crate::messages::claude::ErrorDetails {
                    r#type: gemini_error_kind(&error_body.error.status).to_string(),
                    message: error_body.error.message,
                },
            };

            return Ok(frame_event(&event));
        }

        let chunk: GenerateResponse = serde_json::from_str(data)
            .map_err(|error| LlmError::Parse(format!("Invalid stream chunk: {error}")))?;

        let mut events = Vec::new();

        if !state.message_start_sent {
            if let Some(id) = &chunk.response_id {
                state.message_id = id.clone();
            }
            if let Some(model) = &chunk.model_version {
                state.model = model.clone();
            }

            events.push(StreamEvent::MessageStart {
                message: MessageStart::new(state.message_id.as_str(), state.model.as_str()),
            });
            state.message_start_sent = true;
        }

        let usage = chunk.usage_metadata.as_ref().map(usage_from_gemini);

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return Ok(frame_events(&events));
        };

        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(text) = part.text
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
                    delta: ContentDelta::TextDelta { text },
                });
            }

            // Gemini never fragments tool arguments: each functionCall part
            // is a complete call, emitted as one start and one delta.
            if let Some(call) = part.function_call {
                let index = state.next_block_index();
                let arguments =
                    serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());

                let mut block = ContentBlockState::tool_use();
                let id = synthesized_tool_id();
                block.tool_call_id = Some(id.clone());
                block.tool_name = Some(call.name.clone());
                block.arguments = arguments.clone();
                block.start_sent = true;
                state.content_blocks.insert(index, block);

                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id,
                        name: call.name,
                        input: json!({}),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta { partial_json: arguments },
                });
            }
        }

        if let Some(finish_reason) = candidate.finish_reason.as_deref() {
            events.extend(state.close_open_blocks());

            events.push(StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(gemini_stop_reason(Some(finish_reason))),
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

fn message_parts(message: &Message) -> Vec<Part> {
    match &message.content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(part_from_block).collect(),
    }
}

fn part_from_block(block: &ContentBlock) -> Option<Part> {
    match block {
        ContentBlock::Text { text } => Some(Part::text(text.clone())),
        ContentBlock::ToolUse { name, input, .. } => Some(Part {
            function_call: Some(FunctionCall {
                name: name.clone(),
                args: input.clone(),
            }),
            ..Default::default()
        }),
        // The original function name is not carried across the tool round
        // trip; the tool_use_id stands in for it.
        ContentBlock::ToolResult { tool_use_id, content } => Some(Part {
            function_response: Some(FunctionResponse {
                name: tool_use_id.clone(),
                response: json!({"content": tool_result_text(content)}),
            }),
            ..Default::default()
        }),
        ContentBlock::Other(_) => None,
    }
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .map(|block| match block.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn generation_config(request: &MessagesRequest) -> Option<GenerationConfig> {
    if request.max_tokens.is_none()
        && request.temperature.is_none()
        && request.top_p.is_none()
        && request.top_k.is_none()
    {
        return None;
    }

    Some(GenerationConfig {
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
    })
}

fn declaration_from_tool(tool: &Value) -> Option<FunctionDeclaration> {
    let definition = tool
        .get("function")
        .and_then(Value::as_object)
        .or_else(|| tool.as_object())?;

    let name = definition.get("name")?.as_str()?.to_string();
    let description = definition
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);
    let parameters = definition
        .get("input_schema")
        .or_else(|| definition.get("parameters"))
        .cloned();

    Some(FunctionDeclaration {
        name,
        description,
        parameters,
    })
}

fn synthesized_tool_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!("toolu_{nanos}")
}
