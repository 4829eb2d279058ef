//! Generic Route Engine — C3 (spec.md §4.3).
//!
//! One generic handler, parameterized by an [`Adapter`], implements the
//! seven-step pipeline every route follows: read body → `new_request` →
//! `preCallback` → `toInternal` → decide streaming → call the dispatcher →
//! `fromInternal`/`fromInternalError`. Individual routes (`crate::router`)
//! differ only in which `Adapter` and which pre-callback they plug in.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;
use chrono::Utc;
use futures_util::{Stream, StreamExt};

use crate::dispatch::{Dispatcher, RequestContext};
use crate::error::GatewayError;
use crate::governance::GovernanceStore;
use crate::llm::{Adapter, AdapterError};
use crate::schema;
use crate::stream::StreamRegistry;
use crate::telemetry::{LogStore, Metrics, RequestLog};

/// Everything a route handler needs beyond the per-call body: the plugin
/// pipeline, the governance cache, the streaming accumulator registry, and
/// the request log (spec.md §4.3, §4.4, §4.5, §8 S4). Shared across
/// requests behind `Arc`.
pub struct RouteState {
    pub dispatcher: Dispatcher,
    pub governance: Arc<GovernanceStore>,
    pub streams: Arc<StreamRegistry>,
    pub pricing: Arc<crate::pricing::PricingTable>,
    pub metrics: Arc<Metrics>,
    pub logs: Arc<LogStore>,
}

/// A route-specific mutation applied to the freshly-decoded native request
/// before `to_internal` — the generalization of `preCallback` (spec.md
/// §4.3 step 3): Azure's URL-embedded `deployment_id`, GenAI's
/// URL-embedded `{model}:{method}` suffix, etc. `Ok(())` leaves the
/// request untouched.
pub trait PreCallback<Req>: Fn(&mut Req) -> Result<(), AdapterError> + Send + Sync {}
impl<Req, F: Fn(&mut Req) -> Result<(), AdapterError> + Send + Sync> PreCallback<Req> for F {}

/// Cost accounting needs the pricing row's mode, which tracks the kind of
/// call rather than the provider (spec.md §4.7); derived from the internal
/// request's `Input` variant rather than threaded separately.
fn pricing_mode(input: &schema::Input) -> crate::pricing::Mode {
    match input {
        schema::Input::Chat { .. } | schema::Input::Text { .. } => crate::pricing::Mode::Chat,
        schema::Input::Embedding { .. } => crate::pricing::Mode::Embedding,
        schema::Input::Speech { .. } => crate::pricing::Mode::Speech,
        schema::Input::Transcription { .. } => crate::pricing::Mode::Transcription,
    }
}

fn extract_vk_value(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
}

/// Step 1-2: decode the raw body into the adapter's native request type.
/// An empty or malformed body is a 400 `parse_error`, never a panic or a
/// 500 (spec.md §4.3 "edge cases").
fn decode_body<A: Adapter>(body: &Bytes) -> Result<A::Request, AdapterError> {
    if body.is_empty() {
        return Ok(A::new_request());
    }
    serde_json::from_slice(body).map_err(|e| AdapterError::RequestParse(e.to_string()))
}

/// The non-streaming path of the seven-step pipeline (spec.md §4.3).
/// Generic entry point routes register one instance of per (adapter,
/// pre-callback) pair.
pub async fn handle<A, F>(
    state: Arc<RouteState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
    pre_callback: F,
) -> AxumResponse
where
    A: Adapter,
    F: PreCallback<A::Request>,
{
    match run::<A, F>(&state, &headers, body, &pre_callback).await {
        Ok(native_resp) => (StatusCode::OK, Json(native_resp)).into_response(),
        Err(RouteFailure::Native(status, native_err)) => (status, Json(native_err)).into_response(),
    }
}

pub(crate) enum RouteFailure<E> {
    Native(StatusCode, E),
}

impl<E: serde::Serialize> RouteFailure<E> {
    pub(crate) fn into_response(self) -> AxumResponse {
        match self {
            RouteFailure::Native(status, err) => (status, Json(err)).into_response(),
        }
    }
}

pub(crate) async fn run<A, F>(
    state: &RouteState,
    headers: &axum::http::HeaderMap,
    body: Bytes,
    pre_callback: &F,
) -> Result<A::Response, RouteFailure<A::Error>>
where
    A: Adapter,
    F: PreCallback<A::Request>,
{
    let started = std::time::Instant::now();
    let provider_for_errors = schema::Provider::OpenAI; // overwritten once we know the internal request
    let as_native_error = |e: GatewayError, provider: schema::Provider| {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        state.metrics.record_request(provider, status.as_u16(), started.elapsed());
        let body = e.to_canonical_body(provider);
        RouteFailure::Native(status, A::from_internal_error(&body))
    };

    let mut native = decode_body::<A>(&body)
        .map_err(GatewayError::from)
        .map_err(|e| as_native_error(e, provider_for_errors))?;

    pre_callback(&mut native)
        .map_err(GatewayError::from)
        .map_err(|e| as_native_error(e, provider_for_errors))?;

    let wants_stream = A::is_streaming_requested(&native);

    let internal = A::to_internal(native)
        .map_err(GatewayError::from)
        .map_err(|e| as_native_error(e, provider_for_errors))?;

    let provider = internal.provider;
    let model = internal.model.clone();
    let mode = pricing_mode(&internal.input);
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut ctx = RequestContext::new(request_id.clone(), "POST", Utc::now());
    ctx.vk_value = extract_vk_value(headers);

    if let Some(vk_value) = ctx.vk_value.clone() {
        if let Err(e) = state.governance.check(&vk_value, &model, provider, ctx.created_at) {
            state.metrics.record_budget_rejection();
            return Err(as_native_error(GatewayError::Governance(e), provider));
        }
    }

    if wants_stream {
        // Streaming is handled by `handle_stream`; a generic route that
        // receives a streaming request on the non-streaming entry point
        // rejects it rather than silently buffering (spec.md §4.3 step 5).
        return Err(as_native_error(
            GatewayError::internal("this endpoint requires the streaming handler"),
            provider,
        ));
    }

    let resp = state
        .dispatcher
        .chat_completion(&mut ctx, internal)
        .await
        .map_err(|e| as_native_error(e, provider))?;
    state.metrics.record_request(provider, StatusCode::OK.as_u16(), started.elapsed());

    let mut cost = 0.0;
    if let Some(usage) = &resp.usage {
        cost = state.pricing.cost(&model, provider, mode, usage);
        if let Some(vk_value) = &ctx.vk_value {
            state.governance.apply_cost(vk_value, cost, usage.total_tokens.unwrap_or(0), Utc::now());
        }
    }
    state.logs.record(RequestLog {
        request_id: request_id.clone(),
        provider,
        model: model.clone(),
        status_code: StatusCode::OK.as_u16(),
        latency_ms: started.elapsed().as_millis() as u64,
        cost,
        created_at: ctx.created_at,
    });

    A::from_internal(&resp).map_err(GatewayError::from).map_err(|e| as_native_error(e, provider))
}

/// The streaming path (spec.md §4.3 step 5, §4.5, §8 S4). Each upstream
/// chunk is folded into the request's [`crate::stream::Accumulator`] and
/// re-emitted through the adapter's `from_internal_stream_chunk`, one SSE
/// event per chunk, so a client sees vendor-native SSE framing throughout
/// even though the accumulator and dispatcher only ever see canonical
/// chunks. The first chunk is awaited eagerly so a request that fails
/// outright still surfaces as a JSON error instead of a 200 SSE response
/// with zero events.
pub async fn handle_stream<A, F>(
    state: Arc<RouteState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
    pre_callback: F,
) -> AxumResponse
where
    A: Adapter,
    F: PreCallback<A::Request>,
{
    let started = std::time::Instant::now();
    let mut native = match decode_body::<A>(&body) {
        Ok(n) => n,
        Err(e) => return bad_request::<A>(e.into()),
    };
    if let Err(e) = pre_callback(&mut native) {
        return bad_request::<A>(e.into());
    }
    let internal = match A::to_internal(native) {
        Ok(i) => i,
        Err(e) => return bad_request::<A>(e.into()),
    };

    let provider = internal.provider;
    let model = internal.model.clone();
    let mode = pricing_mode(&internal.input);
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut ctx = RequestContext::new(request_id.clone(), "POST", Utc::now());
    ctx.vk_value = extract_vk_value(&headers);
    let vk_value = ctx.vk_value.clone();

    if let Some(vk_value) = &vk_value {
        if let Err(e) = state.governance.check(vk_value, &model, provider, ctx.created_at) {
            state.metrics.record_budget_rejection();
            return bad_request::<A>(GatewayError::Governance(e));
        }
    }

    let accumulator = state.streams.start(request_id.clone());
    let mut chunks = match state.dispatcher.chat_completion_stream(&mut ctx, internal).await {
        Ok(c) => c,
        Err(e) => return bad_request::<A>(e),
    };

    let first = match chunks.next().await {
        Some(Ok(resp)) => resp,
        Some(Err(e)) => return bad_request::<A>(e),
        None => return bad_request::<A>(GatewayError::internal("upstream stream produced no chunks")),
    };
    state.metrics.record_request(provider, StatusCode::OK.as_u16(), started.elapsed());

    let first_event = match finalize_chunk::<A>(&accumulator, &state, &model, provider, mode, &request_id, &vk_value, started, first) {
        Ok(event) => event,
        Err(e) => return bad_request::<A>(e),
    };

    let rest = {
        let accumulator = accumulator.clone();
        let state = Arc::clone(&state);
        let model = model.clone();
        let request_id = request_id.clone();
        let vk_value = vk_value.clone();
        chunks.filter_map(move |chunk| {
            let accumulator = accumulator.clone();
            let state = Arc::clone(&state);
            let model = model.clone();
            let request_id = request_id.clone();
            let vk_value = vk_value.clone();
            async move {
                let resp = chunk.ok()?;
                finalize_chunk::<A>(&accumulator, &state, &model, provider, mode, &request_id, &vk_value, started, resp)
                    .ok()
                    .map(Ok::<_, std::convert::Infallible>)
            }
        })
    };

    let events = futures_util::stream::once(async move { Ok::<_, std::convert::Infallible>(first_event) }).chain(rest);
    sse_response(events)
}

/// Fold one upstream chunk into the accumulator, apply cost accounting
/// once the accumulator reaches a terminal chunk, and encode the chunk as
/// an SSE `Event` through the adapter (spec.md §4.5, §8 S4).
fn finalize_chunk<A: Adapter>(
    accumulator: &crate::stream::AccumulatorHandle,
    state: &RouteState,
    model: &str,
    provider: schema::Provider,
    mode: crate::pricing::Mode,
    request_id: &str,
    vk_value: &Option<String>,
    started: std::time::Instant,
    resp: schema::Response,
) -> Result<Event, GatewayError> {
    accumulator.ingest(resp.clone());
    if accumulator.is_complete() {
        let mut cost = 0.0;
        if let Some(usage) = &resp.usage {
            cost = state.pricing.cost(model, provider, mode, usage);
            if let Some(vk_value) = vk_value {
                state.governance.apply_cost(vk_value, cost, usage.total_tokens.unwrap_or(0), Utc::now());
            }
        }
        state.logs.record(RequestLog {
            request_id: request_id.to_string(),
            provider,
            model: model.to_string(),
            status_code: StatusCode::OK.as_u16(),
            latency_ms: started.elapsed().as_millis() as u64,
            cost,
            created_at: Utc::now(),
        });
        state.streams.finish(request_id);
    }
    let chunk = A::from_internal_stream_chunk(&resp).map_err(GatewayError::from)?;
    Ok(Event::default().json_data(&chunk).unwrap_or_default())
}

fn sse_response<S>(events: S) -> AxumResponse
where
    S: Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static,
{
    Sse::new(events).into_response()
}

fn bad_request<A: Adapter>(e: GatewayError) -> AxumResponse {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = e.to_canonical_body(schema::Provider::OpenAI);
    (status, Json(A::from_internal_error(&body))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UpstreamClient;
    use crate::llm::openai::ChatAdapter;
    use async_trait::async_trait;

    struct EchoUpstream;
    #[async_trait]
    impl UpstreamClient for EchoUpstream {
        async fn chat_completion(&self, req: &schema::Request) -> Result<schema::Response, GatewayError> {
            Ok(schema::Response {
                id: "r1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: req.model.clone(),
                choices: vec![schema::Choice {
                    index: 0,
                    content: schema::ChoiceContent::Message {
                        message: schema::Message::assistant("hi"),
                    },
                    finish_reason: Some("stop".into()),
                    stop_string: None,
                }],
                usage: Some(schema::Usage {
                    prompt_tokens: Some(1),
                    completion_tokens: Some(1),
                    total_tokens: Some(2),
                    ..Default::default()
                }),
                extra: schema::Extra::default(),
                audio: None,
            })
        }
    }

    fn test_state() -> Arc<RouteState> {
        Arc::new(RouteState {
            dispatcher: Dispatcher::new(Arc::new(EchoUpstream), vec![]),
            governance: Arc::new(GovernanceStore::new()),
            streams: Arc::new(StreamRegistry::new()),
            pricing: Arc::new(crate::pricing::PricingTable::new()),
            metrics: Arc::new(Metrics::new()),
            logs: Arc::new(LogStore::default()),
        })
    }

    #[tokio::test]
    async fn empty_body_decodes_to_default_then_fails_missing_model() {
        // An empty body becomes a zero-valued native request rather than a
        // decode panic (spec.md §4.3 "edge cases") — it then fails
        // `to_internal`'s required-field check like any other request
        // missing `model`, landing on the same 400 path as malformed JSON.
        let state = test_state();
        let body = Bytes::new();
        let resp = handle::<ChatAdapter, _>(state, axum::http::HeaderMap::new(), body, |_| Ok(())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn well_formed_body_without_virtual_key_header_succeeds() {
        let state = test_state();
        let body = Bytes::from_static(br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#);
        let resp = handle::<ChatAdapter, _>(state, axum::http::HeaderMap::new(), body, |_| Ok(())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_body_is_400_parse_error() {
        let state = test_state();
        let body = Bytes::from_static(b"{not json");
        let resp = handle::<ChatAdapter, _>(state, axum::http::HeaderMap::new(), body, |_| Ok(())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pricing_mode_follows_input_variant() {
        assert!(matches!(
            pricing_mode(&schema::Input::Chat { messages: vec![] }),
            crate::pricing::Mode::Chat
        ));
        assert!(matches!(
            pricing_mode(&schema::Input::Embedding {
                input: schema::EmbeddingInput::Single("x".into())
            }),
            crate::pricing::Mode::Embedding
        ));
    }

    #[tokio::test]
    async fn unknown_virtual_key_is_rejected() {
        let state = test_state();
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("authorization", "Bearer sk-unknown".parse().unwrap());
        let body = Bytes::from_static(br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#);
        let resp = handle::<ChatAdapter, _>(state, headers, body, |_| Ok(())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
