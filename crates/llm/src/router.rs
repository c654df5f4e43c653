use bytes::Bytes;
use config::{Config, RouteTarget};
use serde_json::Value;

use crate::{
    error::{LlmError, LlmResult},
    token_counter::{self, LONG_CONTEXT_THRESHOLD},
};

const BACKGROUND_MODEL_PREFIX: &str = "claude-3-5-haiku";

/// Outcome of routing one request.
#[derive(Debug)]
pub(crate) struct Route {
    /// Name of the provider to dispatch to.
    pub provider: String,

    /// Model name the upstream will see.
    pub model: String,

    /// Request body, with the `model` field rewritten to the routed model.
    pub body: Bytes,

    /// Whether the client asked for a streaming response.
    pub stream: bool,
}

/// Choose `(provider, model)` for a request body. First match wins:
/// explicit `provider,model` override, long context, background model
/// prefix, thinking, web search, default.
pub(crate) fn route(body: &Bytes, config: &Config) -> LlmResult<Route> {
    // A malformed body falls through the cascade with an empty model name
    // rather than failing here.
    let mut value: Value = serde_json::from_slice(body).unwrap_or_else(|error| {
        log::debug!("Request body is not valid JSON, routing to default: {error}");
        Value::Object(serde_json::Map::new())
    });

    let model = value.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let stream = value.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // Explicit override: exactly one comma splits provider from model, and
    // suffixes like `:online` stay on the model part.
    if let Some((provider, model_name)) = model.split_once(',')
        && !model_name.contains(',')
    {
        let model_name = model_name.to_string();

        return Ok(Route {
            provider: provider.to_string(),
            body: rewrite_model(&mut value, &model_name)?,
            model: model_name,
            stream,
        });
    }

    let policy = &config.router;

    let target = if token_counter::count(body) > LONG_CONTEXT_THRESHOLD && policy.long_context.is_some() {
        policy.long_context.as_ref()
    } else if model.starts_with(BACKGROUND_MODEL_PREFIX) && policy.background.is_some() {
        policy.background.as_ref()
    } else if value.get("thinking").is_some() && policy.think.is_some() {
        policy.think.as_ref()
    } else if has_web_search_tool(&value) && policy.web_search.is_some() {
        policy.web_search.as_ref()
    } else {
        policy.default.as_ref()
    };

    let Some(target) = target else {
        return Err(LlmError::Config("Router policy has no default target".to_string()));
    };

    route_to_target(target, &mut value, stream)
}

fn route_to_target(target: &RouteTarget, value: &mut Value, stream: bool) -> LlmResult<Route> {
    let model = target.model().to_string();

    Ok(Route {
        provider: target.provider().to_string(),
        body: rewrite_model(value, &model)?,
        model,
        stream,
    })
}

fn rewrite_model(value: &mut Value, model: &str) -> LlmResult<Bytes> {
    if let Some(root) = value.as_object_mut() {
        root.insert("model".to_string(), Value::String(model.to_string()));
    }

    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|error| LlmError::Transform(format!("Failed to serialize routed request: {error}")))
}

fn has_web_search_tool(value: &Value) -> bool {
    value.get("tools").and_then(Value::as_array).is_some_and(|tools| {
        tools.iter().any(|tool| {
            tool.get("type")
                .and_then(Value::as_str)
                .is_some_and(|tool_type| tool_type.starts_with("web_search"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use serde_json::json;

    fn config() -> Config {
        toml::from_str(indoc! {r#"
            [providers.openai]
            api_key = "test"

            [providers.openrouter]
            api_key = "test"

            [providers.anthropic]
            api_key = "test"

            [router]
            default = "openrouter,anthropic/claude-3.5-sonnet"
            think = "openai,o1"
            long_context = "anthropic,claude-3-5-sonnet-20241022"
            background = "openai,gpt-4o-mini"
            web_search = "openrouter,perplexity/sonar:online"
        "#})
        .unwrap()
    }

    fn route_body(body: Value) -> Route {
        route(&Bytes::from(serde_json::to_vec(&body).unwrap()), &config()).unwrap()
    }

    #[test]
    fn explicit_override_wins() {
        let route = route_body(json!({
            "model": "openai,gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        assert_eq!(route.provider, "openai");
        assert_eq!(route.model, "gpt-4o");

        let body: Value = serde_json::from_slice(&route.body).unwrap();
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn override_preserves_model_suffix() {
        let route = route_body(json!({"model": "openrouter,perplexity/sonar:online", "messages": []}));

        assert_eq!(route.provider, "openrouter");
        assert_eq!(route.model, "perplexity/sonar:online");
    }

    #[test]
    fn override_beats_long_context() {
        let filler = "lorem ipsum dolor sit amet ".repeat(30_000);
        let body = json!({
            "model": "openai,gpt-4o",
            "messages": [{"role": "user", "content": filler}]
        });
        let bytes = Bytes::from(serde_json::to_vec(&body).unwrap());
        assert!(token_counter::count(&bytes) > LONG_CONTEXT_THRESHOLD);

        let route = route(&bytes, &config()).unwrap();
        assert_eq!(route.provider, "openai");
        assert_eq!(route.model, "gpt-4o");
    }

    #[test]
    fn long_context_routes_large_bodies() {
        let filler = "lorem ipsum dolor sit amet ".repeat(30_000);
        let route = route_body(json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": filler}]
        }));

        assert_eq!(route.provider, "anthropic");
        assert_eq!(route.model, "claude-3-5-sonnet-20241022");

        let body: Value = serde_json::from_slice(&route.body).unwrap();
        assert_eq!(body["model"], "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn background_prefix_routes_to_background() {
        let route = route_body(json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "summarize"}]
        }));

        assert_eq!(route.provider, "openai");
        assert_eq!(route.model, "gpt-4o-mini");
    }

    #[test]
    fn thinking_requests_route_to_think() {
        let route = route_body(json!({
            "model": "claude-3-5-sonnet",
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": []
        }));

        assert_eq!(route.provider, "openai");
        assert_eq!(route.model, "o1");
    }

    #[test]
    fn web_search_tools_route_to_web_search() {
        let route = route_body(json!({
            "model": "claude-3-5-sonnet",
            "tools": [{"type": "web_search_20250305", "name": "web_search"}],
            "messages": []
        }));

        assert_eq!(route.provider, "openrouter");
        assert_eq!(route.model, "perplexity/sonar:online");
    }

    #[test]
    fn everything_else_routes_to_default() {
        let route = route_body(json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        assert_eq!(route.provider, "openrouter");
        assert_eq!(route.model, "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn malformed_body_routes_to_default() {
        let route = route(&Bytes::from_static(b"{not json"), &config()).unwrap();

        assert_eq!(route.provider, "openrouter");

        let body: Value = serde_json::from_slice(&route.body).unwrap();
        assert_eq!(body["model"], "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn stream_flag_is_surfaced() {
        let route = route_body(json!({"model": "openai,gpt-4o", "stream": true, "messages": []}));
        assert!(route.stream);

        let route = route_body(json!({"model": "openai,gpt-4o", "messages": []}));
        assert!(!route.stream);
    }
}
