//! End-to-end scenario tests driving the full router (spec.md §8 S1-S6),
//! using `tower::ServiceExt::oneshot` the way a real HTTP client would.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bifrost_gateway::dispatch::{Dispatcher, UpstreamClient};
use bifrost_gateway::error::GatewayError;
use bifrost_gateway::governance::{Budget, GovernanceStore, Owner, VirtualKey};
use bifrost_gateway::pricing::PricingTable;
use bifrost_gateway::route::RouteState;
use bifrost_gateway::schema;
use bifrost_gateway::stream::StreamRegistry;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

struct EchoUpstream;

#[async_trait]
impl UpstreamClient for EchoUpstream {
    async fn chat_completion(&self, req: &schema::Request) -> Result<schema::Response, GatewayError> {
        let extra = schema::Extra {
            provider: Some(req.provider),
            raw: None,
        };
        match &req.input {
            schema::Input::Speech { .. } => Ok(schema::Response {
                id: "resp-1".into(),
                object: "audio.speech".into(),
                created: 0,
                model: req.model.clone(),
                choices: vec![],
                usage: None,
                extra,
                audio: Some(vec![0xff, 0xfb, 0x90, 0x00]),
            }),
            schema::Input::Transcription { .. } => Ok(schema::Response {
                id: "resp-1".into(),
                object: "audio.transcription".into(),
                created: 0,
                model: req.model.clone(),
                choices: vec![schema::Choice {
                    index: 0,
                    content: schema::ChoiceContent::Message {
                        message: schema::Message::assistant("transcribed audio"),
                    },
                    finish_reason: None,
                    stop_string: None,
                }],
                usage: Some(schema::Usage {
                    audio_seconds: Some(1.5),
                    ..Default::default()
                }),
                extra,
                audio: None,
            }),
            _ => Ok(schema::Response {
                id: "resp-1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: req.model.clone(),
                choices: vec![schema::Choice {
                    index: 0,
                    content: schema::ChoiceContent::Message {
                        message: schema::Message::assistant("hello from upstream"),
                    },
                    finish_reason: Some("stop".into()),
                    stop_string: None,
                }],
                usage: Some(schema::Usage {
                    prompt_tokens: Some(5),
                    completion_tokens: Some(3),
                    total_tokens: Some(8),
                    ..Default::default()
                }),
                // A real per-provider HTTP client stamps the provider it
                // just called onto the response, so a dispatching adapter
                // (LiteLLM) can pick the right encoder back out in
                // `from_internal`.
                extra,
                audio: None,
            }),
        }
    }
}

fn governed_state(upstream: Arc<dyn UpstreamClient>) -> Arc<RouteState> {
    let governance = Arc::new(GovernanceStore::new());
    governance.insert_virtual_key(VirtualKey {
        id: "vk1".into(),
        value: "sk-test".into(),
        is_active: true,
        allowed_models: vec![],
        allowed_providers: vec![],
        owner: Owner::Customer("cust1".into()),
        budget: Some(Budget::new("b1", 1000.0, std::time::Duration::from_secs(3600), Utc::now()).unwrap()),
        rate_limit: None,
    });

    Arc::new(RouteState {
        dispatcher: Dispatcher::new(upstream, vec![]),
        governance,
        streams: Arc::new(StreamRegistry::new()),
        pricing: Arc::new(PricingTable::new()),
        metrics: Arc::new(bifrost_gateway::telemetry::Metrics::new()),
        logs: Arc::new(bifrost_gateway::telemetry::LogStore::default()),
    })
}

fn test_router() -> axum::Router {
    let state = governed_state(Arc::new(EchoUpstream));
    let metrics = Arc::clone(&state.metrics);
    bifrost_gateway::router::build(state, metrics)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// S1: a plain OpenAI chat completion round-trips through the whole
/// stack without a virtual key (governance is opt-in, spec.md §4.4).
#[tokio::test]
async fn s1_openai_chat_completion_round_trip() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["model"], "gpt-4o");
    assert_eq!(json["choices"][0]["message"]["content"], "hello from upstream");
    assert_eq!(json["usage"]["total_tokens"], 8);
}

/// Anthropic's Messages endpoint produces Anthropic-native framing
/// (`content` as a block array, not OpenAI's flat string).
#[tokio::test]
async fn anthropic_messages_round_trip_produces_native_shape() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/anthropic/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model":"claude-3-opus","max_tokens":100,"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["content"][0]["type"], "text");
    assert_eq!(json["content"][0]["text"], "hello from upstream");
}

/// A virtual key presented via `Authorization: Bearer` is admitted when
/// active and within budget (spec.md §4.4).
#[tokio::test]
async fn request_with_valid_virtual_key_is_admitted() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-test")
        .body(Body::from(r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

/// An unknown virtual key is rejected with a 404 before the upstream is
/// ever called (spec.md §4.4).
#[tokio::test]
async fn request_with_unknown_virtual_key_is_rejected() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-does-not-exist")
        .body(Body::from(r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

/// A malformed JSON body is a 400 parse error at the route boundary, not
/// a 500 or a panic (spec.md §4.3 "edge cases").
#[tokio::test]
async fn malformed_body_is_bad_request() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not valid json"))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

/// The Azure route's URL-embedded deployment ID overrides the body's
/// `model` unconditionally (spec.md §4.2, testable property 9).
#[tokio::test]
async fn azure_deployment_id_overrides_body_model() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/azure/openai/deployments/prod-deployment/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"ignored","messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["model"], "azure/prod-deployment");
}

/// The LiteLLM dispatch route classifies a bare Anthropic-style model
/// name by heuristic and returns Anthropic-native framing (spec.md §8
/// S6).
#[tokio::test]
async fn litellm_dispatch_classifies_bare_claude_model_as_anthropic() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/litellm/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"claude-3-opus","max_tokens":100,"messages":[{"role":"user","content":"hi"}]}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["content"][0]["type"], "text");
}

/// `/metrics` is reachable independent of the chat routes' state
/// (SPEC_FULL.md §B.5).
#[tokio::test]
async fn metrics_endpoint_returns_prometheus_text_format() {
    let router = test_router();
    let req = Request::builder().method("GET").uri("/metrics").body(Body::empty()).unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    // A fresh registry with no recorded samples still renders valid
    // (possibly empty) Prometheus text, never an error body.
    assert!(String::from_utf8(bytes.to_vec()).is_ok());
}

/// The MCP tool-execute stub exists and reports itself as unimplemented
/// rather than 404ing or panicking (SPEC_FULL.md §C).
#[tokio::test]
async fn mcp_tool_execute_reports_not_implemented() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/v1/mcp/tool/execute")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"tool":"noop","arguments":{}}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

/// Text-to-speech returns raw audio bytes with an audio content type, not
/// a JSON envelope (spec.md §6 HTTP surface table).
#[tokio::test]
async fn openai_speech_returns_raw_audio_bytes() {
    let router = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/audio/speech")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"tts-1","input":"hello","voice":"alloy"}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("audio/mpeg")
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), &[0xff, 0xfb, 0x90, 0x00]);
}

/// Audio transcription accepts `multipart/form-data` and returns the
/// transcribed text as ordinary JSON (spec.md §4.3 step 1).
#[tokio::test]
async fn openai_transcription_accepts_multipart_and_returns_text() {
    let router = test_router();
    let boundary = "X-BOUNDARY-1";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"model\"\r\n\r\nwhisper-1\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
    );
    body.extend_from_slice(&[1, 2, 3, 4]);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/audio/transcriptions")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["text"], "transcribed audio");
}

struct ThreeChunkUpstream;

#[async_trait]
impl UpstreamClient for ThreeChunkUpstream {
    async fn chat_completion(&self, _req: &schema::Request) -> Result<schema::Response, GatewayError> {
        unreachable!("the streaming scenario only calls chat_completion_stream")
    }

    async fn chat_completion_stream(&self, req: &schema::Request) -> Result<bifrost_gateway::dispatch::ChunkStream, GatewayError> {
        let extra = schema::Extra {
            provider: Some(req.provider),
            raw: None,
        };
        let chunk = |text: &str, finish_reason: Option<&str>, usage: Option<schema::Usage>| schema::Response {
            id: "resp-1".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            model: req.model.clone(),
            choices: vec![schema::Choice {
                index: 0,
                content: schema::ChoiceContent::Message {
                    message: schema::Message::assistant(text),
                },
                finish_reason: finish_reason.map(str::to_string),
                stop_string: None,
            }],
            usage,
            extra: extra.clone(),
            audio: None,
        };
        let chunks = vec![
            Ok(chunk("Hel", None, None)),
            Ok(chunk("lo", None, None)),
            Ok(chunk(
                "!",
                Some("stop"),
                Some(schema::Usage {
                    prompt_tokens: Some(1),
                    completion_tokens: Some(1),
                    total_tokens: Some(2),
                    ..Default::default()
                }),
            )),
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// S4: three upstream chunks produce three ordered SSE events, and the
/// request log records one `total_tokens: 2` row once the accumulator
/// reaches the terminal chunk (spec.md §4.5, §8 S4).
#[tokio::test]
async fn s4_three_upstream_chunks_produce_three_ordered_sse_events() {
    let state = governed_state(Arc::new(ThreeChunkUpstream));
    let logs = Arc::clone(&state.logs);
    let metrics = Arc::clone(&state.metrics);
    let router = bifrost_gateway::router::build(state, metrics);

    let req = Request::builder()
        .method("POST")
        .uri("/openai/v1/chat/completions/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model":"gpt-4o","stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<&str> = body.split("\n\n").map(str::trim).filter(|e| !e.is_empty()).collect();
    assert_eq!(events.len(), 3);
    assert!(events[0].contains("\"content\":\"Hel\""));
    assert!(events[1].contains("\"content\":\"lo\""));
    assert!(events[2].contains("\"content\":\"!\""));

    let recent = logs.recent(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status_code, StatusCode::OK.as_u16());
    assert_eq!(recent[0].cost, 0.0);
}
