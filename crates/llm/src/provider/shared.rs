//! Helpers shared across provider adapters: tool-call id rewriting,
//! stop-reason and usage mapping, and SSE event framing.

use serde_json::Value;

use crate::messages::{
    claude::{StopReason, StreamEvent, Usage},
    gemini, openai,
};

/// Rewrite an upstream tool-call id into the Claude `toolu_` convention.
///
/// `toolu_` ids pass through, `call_` ids swap their prefix, anything else
/// gets the prefix prepended. One-way and deterministic.
pub(crate) fn claude_tool_id(id: &str) -> String {
    if id.starts_with("toolu_") {
        id.to_string()
    } else if let Some(suffix) = id.strip_prefix("call_") {
        format!("toolu_{suffix}")
    } else {
        format!("toolu_{id}")
    }
}

/// The inverse convention for ids sent upstream: `toolu_` becomes `call_`.
pub(crate) fn openai_tool_id(id: &str) -> String {
    if id.starts_with("call_") {
        id.to_string()
    } else if let Some(suffix) = id.strip_prefix("toolu_") {
        format!("call_{suffix}")
    } else {
        format!("call_{id}")
    }
}

/// Map an OpenAI-family `finish_reason` to a Claude stop reason.
pub(crate) fn openai_stop_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("content_filter") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Map a Gemini `finishReason` to a Claude stop reason.
pub(crate) fn gemini_stop_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        Some("SAFETY") | Some("RECITATION") | Some("LANGUAGE") | Some("BLOCKLIST")
        | Some("PROHIBITED_CONTENT") | Some("SPII") => StopReason::StopSequence,
        Some("MALFORMED_FUNCTION_CALL") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Map a Gemini error `status` to a Claude error-envelope kind.
pub(crate) fn gemini_error_kind(status: &str) -> &'static str {
    match status {
        "INVALID_ARGUMENT" => "invalid_request_error",
        "UNAUTHENTICATED" => "authentication_error",
        "PERMISSION_DENIED" => "permission_error",
        "NOT_FOUND" => "not_found_error",
        "RESOURCE_EXHAUSTED" | "DEADLINE_EXCEEDED" => "rate_limit_error",
        "UNAVAILABLE" => "overloaded_error",
        _ => "api_error",
    }
}

/// Map OpenAI-family usage fields into the Claude shape.
pub(crate) fn usage_from_openai(usage: &openai::ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens.unwrap_or(0),
        output_tokens: usage.completion_tokens.unwrap_or(0),
        cache_read_input_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens),
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
        server_tool_use: usage.server_tool_use.clone(),
    }
}

/// Map Gemini usage metadata into the Claude shape.
pub(crate) fn usage_from_gemini(usage: &gemini::UsageMetadata) -> Usage {
    Usage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0),
        ..Default::default()
    }
}

/// Parse a tool-argument string into its JSON value. Empty or invalid
/// arguments become an empty object.
pub(crate) fn parse_tool_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Frame one event as `event: <type>\ndata: <json>\n\n`.
pub(crate) fn frame_event(event: &StreamEvent) -> Vec<u8> {
    let json = serde_json::to_string(event).unwrap_or_else(|error| {
        log::error!("Failed to serialize stream event: {error}");
        r#"{"type":"ping"}"#.to_string()
    });

    format!("event: {}\ndata: {json}\n\n", event.name()).into_bytes()
}

/// Frame a sequence of events into one contiguous SSE byte group.
pub(crate) fn frame_events(events: &[StreamEvent]) -> Vec<u8> {
    let mut out = Vec::new();

    for event in events {
        out.extend_from_slice(&frame_event(event));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_id_rewriting_is_deterministic() {
        assert_eq!(claude_tool_id("toolu_abc"), "toolu_abc");
        assert_eq!(claude_tool_id("call_abc"), "toolu_abc");
        assert_eq!(claude_tool_id("abc"), "toolu_abc");

        assert_eq!(openai_tool_id("toolu_abc"), "call_abc");
        assert_eq!(openai_tool_id("call_abc"), "call_abc");
        assert_eq!(openai_tool_id("abc"), "call_abc");
    }

    #[test]
    fn openai_stop_reasons_map_to_claude() {
        assert_eq!(openai_stop_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(openai_stop_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(openai_stop_reason(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(openai_stop_reason(Some("function_call")), StopReason::ToolUse);
        assert_eq!(openai_stop_reason(Some("content_filter")), StopReason::StopSequence);
        assert_eq!(openai_stop_reason(Some("")), StopReason::EndTurn);
        assert_eq!(openai_stop_reason(None), StopReason::EndTurn);
        assert_eq!(openai_stop_reason(Some("anything_else")), StopReason::EndTurn);
    }

    #[test]
    fn gemini_stop_reasons_map_to_claude() {
        assert_eq!(gemini_stop_reason(Some("STOP")), StopReason::EndTurn);
        assert_eq!(gemini_stop_reason(Some("MAX_TOKENS")), StopReason::MaxTokens);
        assert_eq!(gemini_stop_reason(Some("SAFETY")), StopReason::StopSequence);
        assert_eq!(gemini_stop_reason(Some("SPII")), StopReason::StopSequence);
        assert_eq!(gemini_stop_reason(Some("MALFORMED_FUNCTION_CALL")), StopReason::ToolUse);
        assert_eq!(gemini_stop_reason(Some("OTHER")), StopReason::EndTurn);
        assert_eq!(gemini_stop_reason(Some("FINISH_REASON_UNSPECIFIED")), StopReason::EndTurn);
        assert_eq!(gemini_stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn usage_mapping_carries_cache_fields() {
        let usage: openai::ChatUsage = serde_json::from_value(json!({
            "prompt_tokens": 100,
            "completion_tokens": 10,
            "prompt_tokens_details": {"cached_tokens": 80},
            "cache_creation_input_tokens": 5,
            "server_tool_use": {"web_search_requests": 2}
        }))
        .unwrap();

        let mapped = usage_from_openai(&usage);
        assert_eq!(mapped.input_tokens, 100);
        assert_eq!(mapped.output_tokens, 10);
        assert_eq!(mapped.cache_read_input_tokens, Some(80));
        assert_eq!(mapped.cache_creation_input_tokens, Some(5));
        assert_eq!(mapped.server_tool_use.unwrap()["web_search_requests"], 2);
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_tool_arguments(""), json!({}));
        assert_eq!(parse_tool_arguments("{not json"), json!({}));
        assert_eq!(parse_tool_arguments(r#"{"p":"v"}"#), json!({"p": "v"}));
    }

    #[test]
    fn framing_uses_the_event_name() {
        let event = StreamEvent::ContentBlockStop { index: 2 };
        let framed = String::from_utf8(frame_event(&event)).unwrap();

        assert_eq!(framed, "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":2}\n\n");
    }
}
