//! End-to-end tests driving the proxy surface against a canned upstream
//! bound on the loopback interface.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

/// A recorded upstream: answers every request with a fixed response and
/// keeps the JSON bodies it received.
struct Upstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Upstream {
    async fn spawn(status: u16, content_type: &'static str, body: &'static str) -> Upstream {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = requests.clone();

        let app = Router::new().fallback(move |request_body: Bytes| {
            let captured = captured.clone();

            async move {
                let value = serde_json::from_slice::<Value>(&request_body).unwrap_or(Value::Null);
                captured.lock().unwrap().push(value);

                (
                    StatusCode::from_u16(status).unwrap(),
                    [(header::CONTENT_TYPE, content_type)],
                    body,
                )
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Upstream { addr, requests }
    }

    fn received(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

fn proxy_for(config: &str) -> Router {
    let config: config::Config = toml::from_str(config).unwrap();
    llm::router(&config).unwrap()
}

async fn post(app: Router, body: Value) -> (StatusCode, Option<String>, Bytes) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

    (status, content_type, body)
}

#[tokio::test]
async fn openrouter_text_response_is_translated() {
    let upstream = Upstream::spawn(
        200,
        "application/json",
        r#"{"id":"x","model":"anthropic/claude-3.5-sonnet","choices":[{"message":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":1}}"#,
    )
    .await;

    let app = proxy_for(&format!(
        r#"
        [providers.openrouter]
        endpoint = "http://{}/api/v1/chat/completions"
        api_key = "test-key"

        [router]
        default = "openrouter,anthropic/claude-3.5-sonnet"
        "#,
        upstream.addr
    ));

    let (status, content_type, body) = post(
        app,
        json!({
            "model": "openrouter,anthropic/claude-3.5-sonnet",
            "messages": [{"role": "user", "content": "Hi"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body,
        json!({
            "id": "x",
            "type": "message",
            "role": "assistant",
            "model": "anthropic/claude-3.5-sonnet",
            "content": [{"type": "text", "text": "Hello"}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 5, "output_tokens": 1}
        })
    );
}

#[tokio::test]
async fn upstream_error_is_forwarded_verbatim() {
    let error_body = r#"{"error":{"message":"bad key","type":"authentication_error"}}"#;
    let upstream = Upstream::spawn(401, "application/json", error_body).await;

    let app = proxy_for(&format!(
        r#"
        [providers.openai]
        endpoint = "http://{}/v1/chat/completions"
        type = "openai"
        api_key = "test-key"

        [router]
        default = "openai,gpt-4o"
        "#,
        upstream.addr
    ));

    let (status, content_type, body) = post(
        app,
        json!({"model": "openai,gpt-4o", "messages": [{"role": "user", "content": "Hi"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(&body[..], error_body.as_bytes());
}

#[tokio::test]
async fn tool_choice_and_cache_control_never_reach_the_upstream() {
    let upstream = Upstream::spawn(
        200,
        "application/json",
        r#"{"id":"x","choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#,
    )
    .await;

    let app = proxy_for(&format!(
        r#"
        [providers.openai]
        endpoint = "http://{}/v1/chat/completions"
        type = "openai"
        api_key = "test-key"

        [router]
        default = "openai,gpt-4o"
        "#,
        upstream.addr
    ));

    let (status, _, _) = post(
        app,
        json!({
            "model": "openai,gpt-4o",
            "tools": [],
            "tool_choice": "auto",
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "Hi", "cache_control": {"type": "ephemeral"}}]
            }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);

    let received = upstream.received();
    assert_eq!(received.len(), 1);

    let sent = serde_json::to_string(&received[0]).unwrap();
    assert!(received[0].get("tool_choice").is_none());
    assert!(received[0].get("tools").is_none());
    assert!(!sent.contains("cache_control"));
}

#[tokio::test]
async fn long_context_requests_are_rerouted_with_the_model_rewritten() {
    let upstream = Upstream::spawn(
        200,
        "application/json",
        r#"{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-5-sonnet-20241022","content":[{"type":"text","text":"ok"}],"stop_reason":"end_turn","stop_sequence":null,"usage":{"input_tokens":60001,"output_tokens":1}}"#,
    )
    .await;

    let app = proxy_for(&format!(
        r#"
        [providers.anthropic]
        endpoint = "http://{}/v1/messages"
        api_key = "test-key"

        [router]
        default = "anthropic,claude-3-5-sonnet-20241022"
        long_context = "anthropic,claude-3-5-sonnet-20241022"
        "#,
        upstream.addr
    ));

    let filler = "lorem ipsum dolor sit amet ".repeat(30_000);
    let (status, _, _) = post(
        app,
        json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": filler}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);

    let received = upstream.received();
    assert_eq!(received[0]["model"], "claude-3-5-sonnet-20241022");
}

#[tokio::test]
async fn openrouter_tool_call_stream_is_translated() {
    let sse_body = concat!(
        ": OPENROUTER PROCESSING\n\n",
        "data: {\"id\":\"gen-1\",\"model\":\"anthropic/claude-3.5-sonnet\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"id\":\"call_X\",\"index\":0,\"function\":{\"name\":\"F\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"p\\\"\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"v\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":7}}\n\n",
        "data: [DONE]\n\n",
    );

    let upstream = Upstream::spawn(200, "text/event-stream", sse_body).await;

    let app = proxy_for(&format!(
        r#"
        [providers.openrouter]
        endpoint = "http://{}/api/v1/chat/completions"
        api_key = "test-key"

        [router]
        default = "openrouter,anthropic/claude-3.5-sonnet"
        "#,
        upstream.addr
    ));

    let (status, content_type, body) = post(
        app,
        json!({
            "model": "openrouter,anthropic/claude-3.5-sonnet",
            "stream": true,
            "tools": [{"name": "F", "input_schema": {"type": "object"}}],
            "messages": [{"role": "user", "content": "call F"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/event-stream"));

    let output = String::from_utf8(body.to_vec()).unwrap();

    let events: Vec<Value> = output
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| serde_json::from_str(payload).unwrap())
        .collect();

    let kinds: Vec<&str> = events.iter().map(|event| event["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        [
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );

    assert_eq!(events[1]["content_block"]["id"], "toolu_X");
    assert_eq!(events[1]["content_block"]["name"], "F");

    let arguments: String = events
        .iter()
        .filter(|event| event["type"] == "content_block_delta")
        .map(|event| event["delta"]["partial_json"].as_str().unwrap())
        .collect();
    assert_eq!(arguments, r#"{"p":"v"}"#);

    assert_eq!(events[5]["delta"]["stop_reason"], "tool_use");
    assert_eq!(events[5]["usage"], json!({"input_tokens": 10, "output_tokens": 7}));

    assert!(!output.contains("OPENROUTER"));
    assert!(output.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn anthropic_requests_pass_through_unchanged() {
    let upstream = Upstream::spawn(
        200,
        "application/json",
        r#"{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-5-sonnet-20241022","content":[{"type":"text","text":"ok"}],"stop_reason":"end_turn","stop_sequence":null,"usage":{"input_tokens":2,"output_tokens":1}}"#,
    )
    .await;

    let app = proxy_for(&format!(
        r#"
        [providers.anthropic]
        endpoint = "http://{}/v1/messages"
        api_key = "test-key"

        [router]
        default = "anthropic,claude-3-5-sonnet-20241022"
        "#,
        upstream.addr
    ));

    let request = json!({
        "model": "anthropic,claude-3-5-sonnet-20241022",
        "max_tokens": 16,
        "metadata": {"user_id": "u1"},
        "messages": [{"role": "user", "content": "Hi"}]
    });

    let (status, _, _) = post(app, request).await;
    assert_eq!(status, StatusCode::OK);

    // The identity adapter forwards the routed body untouched, metadata
    // included.
    let received = upstream.received();
    assert_eq!(received[0]["metadata"]["user_id"], "u1");
    assert_eq!(received[0]["model"], "claude-3-5-sonnet-20241022");
    assert_eq!(received[0]["max_tokens"], 16);
}
