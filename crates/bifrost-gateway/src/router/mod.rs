//! Router Surface — C8 (spec.md §4.8).
//!
//! Builds the axum [`Router`] exposing one path table per integration
//! (`/openai`, `/anthropic`, `/genai`, `/litellm`), plus the Azure
//! deployment-ID variant and the GenAI URL-embedded-model variant.
//! Route handlers are thin: each just binds a concrete [`Adapter`] and an
//! optional pre-callback to the generic functions in `crate::route`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::llm::anthropic::MessagesAdapter;
use crate::llm::genai::{self, GenerateContentAdapter};
use crate::llm::litellm::DispatchAdapter;
use crate::llm::openai::{self, AzureChatAdapter, ChatAdapter};
use crate::route::{self, RouteState};
use crate::telemetry::Metrics;

pub fn build(state: Arc<RouteState>, metrics: Arc<Metrics>) -> Router {
    let chat_router = Router::new()
        .nest("/openai", openai_routes())
        .nest("/anthropic", anthropic_routes())
        .nest("/genai", genai_routes())
        .nest("/litellm", litellm_routes())
        .nest("/azure", azure_routes())
        // LangChain's client composes the three chat-capable integrations
        // under one prefix rather than introducing its own wire shape
        // (SPEC_FULL.md §C "LangChain composite router").
        .nest("/langchain/openai", openai_routes())
        .nest("/langchain/anthropic", anthropic_routes())
        .nest("/langchain/genai", genai_routes())
        // LangChain's OpenAI-compatible client also hits the bare chat
        // path with no integration prefix (spec.md §4.8 "composite
        // surface").
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/mcp/tool/execute", post(mcp_tool_execute_stub))
        .with_state(state);

    let metrics_router = Router::new().route("/metrics", get(metrics_handler)).with_state(metrics);

    chat_router.merge(metrics_router)
}

/// MCP tool execution is out of scope (spec.md §1 Non-goals), but the
/// endpoint is named in the HTTP surface table (SPEC_FULL.md §C), so it
/// exists as a stub that satisfies the interface contract without running
/// any tools.
async fn mcp_tool_execute_stub(Json(_body): Json<Value>) -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "status": "not_implemented",
            "message": "MCP tool execution is not implemented by this gateway",
        })),
    )
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn openai_chat(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle::<ChatAdapter, _>(state, headers, body, |_| Ok(())).await
}

async fn openai_chat_stream(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle_stream::<ChatAdapter, _>(state, headers, body, |_| Ok(())).await
}

async fn openai_embeddings(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle::<openai::embeddings::EmbeddingsAdapter, _>(state, headers, body, |_| Ok(())).await
}

/// Text-to-speech returns raw audio bytes, not JSON (spec.md §6 HTTP
/// surface table), so it bypasses `route::handle`'s `Json` wrapping and
/// calls the inner pipeline (`route::run`) directly.
async fn openai_speech(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    match route::run::<openai::speech::SpeechAdapter, _>(&state, &headers, body, &|_| Ok(())).await {
        Ok(audio) => ([(axum::http::header::CONTENT_TYPE, "audio/mpeg")], audio).into_response(),
        Err(failure) => failure.into_response(),
    }
}

/// Audio transcription is the one route whose body is `multipart/form-
/// data` rather than JSON (spec.md §4.3 step 1); the multipart fields are
/// collected into `schema::TranscriptionInput` here, at the route
/// boundary, before `TranscriptionAdapter::to_internal` ever runs.
async fn openai_transcriptions(
    State(state): State<Arc<RouteState>>,
    headers: HeaderMap,
    mut multipart: axum::extract::Multipart,
) -> impl IntoResponse {
    let mut model = None;
    let mut input = schema::TranscriptionInput::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return bad_multipart(e.to_string()),
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                input.filename = field.file_name().unwrap_or("audio").to_string();
                input.file = match field.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => return bad_multipart(e.to_string()),
                };
            },
            "model" => model = field.text().await.ok(),
            "language" => input.language = field.text().await.ok(),
            "prompt" => input.prompt = field.text().await.ok(),
            "response_format" => input.response_format = field.text().await.ok(),
            "temperature" => input.temperature = field.text().await.ok().and_then(|t| t.parse().ok()),
            "include[]" | "include" => {
                if let Ok(v) = field.text().await {
                    input.include.push(v);
                }
            },
            "timestamp_granularities[]" | "timestamp_granularities" => {
                if let Ok(v) = field.text().await {
                    input.timestamp_granularities.push(v);
                }
            },
            "stream" => input.stream = field.text().await.ok().map(|t| t == "true").unwrap_or(false),
            _ => {
                let _ = field.bytes().await;
            },
        }
    }

    let native = openai::transcription::Request { model, input };
    let body = match serde_json::to_vec(&native) {
        Ok(b) => Bytes::from(b),
        Err(e) => return bad_multipart(e.to_string()),
    };
    route::handle::<openai::transcription::TranscriptionAdapter, _>(state, headers, body, |_| Ok(())).await
}

fn bad_multipart(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": { "message": message, "type": "parse_error" } })),
    )
        .into_response()
}

fn openai_routes() -> Router<Arc<RouteState>> {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/chat/completions/stream", post(openai_chat_stream))
        .route("/v1/embeddings", post(openai_embeddings))
        .route("/v1/audio/speech", post(openai_speech))
        .route("/v1/audio/transcriptions", post(openai_transcriptions))
}

async fn anthropic_messages(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle::<MessagesAdapter, _>(state, headers, body, |_| Ok(())).await
}

async fn anthropic_messages_stream(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle_stream::<MessagesAdapter, _>(state, headers, body, |_| Ok(())).await
}

fn anthropic_routes() -> Router<Arc<RouteState>> {
    Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/messages/stream", post(anthropic_messages_stream))
}

/// GenAI embeds both the model and the operation (`generateContent` /
/// `streamGenerateContent` / `embedContent`) in the URL path rather than
/// the body (spec.md §4.2 "GenAI variant"); the pre-callback here is what
/// stitches the extracted model back into the native request the adapter
/// otherwise treats as self-contained.
async fn genai_generate(
    State(state): State<Arc<RouteState>>,
    Path(model_and_suffix): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let (model, is_stream) = genai::split_model_suffix(&model_and_suffix);
    let model = model.to_string();
    if is_stream {
        route::handle_stream::<GenerateContentAdapter, _>(state, headers, body, move |req: &mut genai::Request| {
            req.model = Some(model.clone());
            Ok(())
        })
        .await
    } else {
        route::handle::<GenerateContentAdapter, _>(state, headers, body, move |req: &mut genai::Request| {
            req.model = Some(model.clone());
            Ok(())
        })
        .await
    }
}

fn genai_routes() -> Router<Arc<RouteState>> {
    Router::new().route("/v1/models/{*model_and_suffix}", post(genai_generate))
}

async fn litellm_dispatch(State(state): State<Arc<RouteState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    route::handle::<DispatchAdapter, _>(state, headers, body, |_| Ok(())).await
}

fn litellm_routes() -> Router<Arc<RouteState>> {
    Router::new().route("/v1/chat/completions", post(litellm_dispatch))
}

/// Azure's deployment ID comes from the URL, and unconditionally
/// overrides whatever `model` the body carried (spec.md §4.2, testable
/// property 9).
async fn azure_chat(
    State(state): State<Arc<RouteState>>,
    Path(deployment_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    route::handle::<AzureChatAdapter, _>(state, headers, body, move |req: &mut openai::Request| {
        openai::apply_deployment_id(req, &deployment_id);
        Ok(())
    })
    .await
}

fn azure_routes() -> Router<Arc<RouteState>> {
    Router::new().route("/openai/deployments/{deployment_id}/chat/completions", post(azure_chat))
}
