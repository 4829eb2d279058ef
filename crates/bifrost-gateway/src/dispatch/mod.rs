//! Dispatcher & Plugin Pipeline — C4 (spec.md §4.4).
//!
//! Replaces the source's ambient context-key lookups (request-ID, method,
//! created-at, dropped-create flag) with an explicit argument struct
//! (spec.md §9 "Context-carried values → explicit dispatcher argument
//! struct") threaded through every hook by reference.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;
use crate::schema;

/// One upstream chunk, successful or not — the dispatcher and the
/// streaming route handler both consume this directly (spec.md §4.4
/// "channel of (response, error) chunks").
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<schema::Response, GatewayError>> + Send>>;

/// Carried through the whole pipeline instead of ambient context lookups.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub method: String,
    /// Set by admission control when a pre-hook short-circuits the
    /// request; lets the logging plugin skip its own post-hook update
    /// (spec.md §4.4).
    pub dropped_create: bool,
    pub vk_value: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, now: DateTime<Utc>) -> Self {
        RequestContext {
            request_id: request_id.into(),
            created_at: now,
            method: method.into(),
            dropped_create: false,
            vk_value: None,
        }
    }
}

/// A plugin pre-hook may let the request through unmodified, mutate it, or
/// short-circuit straight to post-hooks with a canned response or error.
pub enum PreOutcome {
    Continue(schema::Request),
    ShortCircuit(Result<schema::Response, GatewayError>),
}

/// `{GetName, PreHook, PostHook, Cleanup}` (spec.md §4.4).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_hook(&self, ctx: &mut RequestContext, req: schema::Request) -> Result<PreOutcome, GatewayError> {
        Ok(PreOutcome::Continue(req))
    }

    /// Runs in reverse registration order so wrapping plugins observe the
    /// final state inner plugins produced (spec.md §4.4).
    async fn post_hook(
        &self,
        _ctx: &RequestContext,
        resp: Result<schema::Response, GatewayError>,
    ) -> Result<schema::Response, GatewayError> {
        resp
    }

    async fn cleanup(&self, _ctx: &RequestContext) {}
}

/// Invokes the upstream provider once an internal request has cleared all
/// pre-hooks. A real implementation calls out over HTTP; tests and the
/// in-process examples substitute a stub.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn chat_completion(&self, req: &schema::Request) -> Result<schema::Response, GatewayError>;

    /// Streaming variant: a provider driver that genuinely streams
    /// overrides this with one chunk per upstream SSE event. The default
    /// treats the non-streaming call as a one-chunk stream, so drivers
    /// that don't support streaming yet still work through `handle_stream`
    /// (spec.md §4.4).
    async fn chat_completion_stream(&self, req: &schema::Request) -> Result<ChunkStream, GatewayError> {
        let resp = self.chat_completion(req).await;
        Ok(Box::pin(futures_util::stream::once(async move { resp })))
    }
}

pub struct Dispatcher {
    plugins: Vec<Arc<dyn Plugin>>,
    upstream: Arc<dyn UpstreamClient>,
}

impl Dispatcher {
    pub fn new(upstream: Arc<dyn UpstreamClient>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Dispatcher { plugins, upstream }
    }

    /// Runs pre-hooks in registration order, the upstream call (unless
    /// short-circuited), then post-hooks in reverse order, then cleanup for
    /// every plugin regardless of outcome (spec.md §4.4).
    pub async fn chat_completion(
        &self,
        ctx: &mut RequestContext,
        mut req: schema::Request,
    ) -> Result<schema::Response, GatewayError> {
        let mut short_circuited: Option<Result<schema::Response, GatewayError>> = None;

        for plugin in &self.plugins {
            match plugin.pre_hook(ctx, req).await {
                Ok(PreOutcome::Continue(next)) => req = next,
                Ok(PreOutcome::ShortCircuit(outcome)) => {
                    ctx.dropped_create = true;
                    short_circuited = Some(outcome);
                    break;
                },
                Err(e) => {
                    self.cleanup_all(ctx).await;
                    return Err(e);
                },
            }
        }

        let mut result = match short_circuited {
            Some(outcome) => outcome,
            None => self.attempt_with_fallbacks(&req).await,
        };

        for plugin in self.plugins.iter().rev() {
            result = plugin.post_hook(ctx, result).await;
        }

        self.cleanup_all(ctx).await;
        result
    }

    /// Streaming counterpart of [`Dispatcher::chat_completion`]: pre-hooks
    /// run once upfront same as the non-streaming path, then every upstream
    /// chunk is passed through post-hooks in reverse order (spec.md §4.4,
    /// §8 S4 "three upstream chunks produce three ordered SSE events").
    /// Fallbacks don't apply once a stream has started emitting chunks, so
    /// only the primary `{provider, model}` is attempted. Cleanup runs once
    /// the chunk stream is obtained rather than once it's drained — plugins
    /// see it exactly once either way, just earlier than in the
    /// non-streaming path.
    pub async fn chat_completion_stream(&self, ctx: &mut RequestContext, mut req: schema::Request) -> Result<ChunkStream, GatewayError> {
        for plugin in &self.plugins {
            match plugin.pre_hook(ctx, req).await {
                Ok(PreOutcome::Continue(next)) => req = next,
                Ok(PreOutcome::ShortCircuit(outcome)) => {
                    ctx.dropped_create = true;
                    self.cleanup_all(ctx).await;
                    return Ok(Box::pin(futures_util::stream::once(async move { outcome })));
                },
                Err(e) => {
                    self.cleanup_all(ctx).await;
                    return Err(e);
                },
            }
        }

        let chunks = self.upstream.chat_completion_stream(&req).await?;
        self.cleanup_all(ctx).await;

        let plugins = self.plugins.clone();
        let ctx_snapshot = ctx.clone();
        let stream = chunks.then(move |chunk| {
            let plugins = plugins.clone();
            let ctx_snapshot = ctx_snapshot.clone();
            async move {
                let mut result = chunk;
                for plugin in plugins.iter().rev() {
                    result = plugin.post_hook(&ctx_snapshot, result).await;
                }
                result
            }
        });
        Ok(Box::pin(stream))
    }

    /// Attempts the primary `{provider, model}`, then each entry in
    /// `fallbacks[]` in order, but only on upstream errors the provider
    /// driver classifies as retriable — parse and governance errors never
    /// trigger a fallback (spec.md §7 "Fallbacks").
    async fn attempt_with_fallbacks(&self, req: &schema::Request) -> Result<schema::Response, GatewayError> {
        match self.upstream.chat_completion(req).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_retriable_upstream() && !req.fallbacks.is_empty() => {
                let mut last_err = e;
                for fallback in &req.fallbacks {
                    let mut attempt = req.clone();
                    attempt.provider = fallback.provider;
                    attempt.model = fallback.model.clone();
                    match self.upstream.chat_completion(&attempt).await {
                        Ok(resp) => return Ok(resp),
                        Err(e) if e.is_retriable_upstream() => last_err = e,
                        Err(e) => return Err(e),
                    }
                }
                Err(last_err)
            },
            Err(e) => Err(e),
        }
    }

    async fn cleanup_all(&self, ctx: &RequestContext) {
        for plugin in &self.plugins {
            plugin.cleanup(ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct StubUpstream {
        calls: AtomicUsize,
        fail_primary: bool,
    }

    #[async_trait]
    impl UpstreamClient for StubUpstream {
        async fn chat_completion(&self, req: &schema::Request) -> Result<schema::Response, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_primary && req.provider == schema::Provider::OpenAI {
                return Err(GatewayError::Upstream {
                    status: Some(503),
                    message: "overloaded".into(),
                    retriable: true,
                });
            }
            Ok(stub_response())
        }
    }

    fn stub_response() -> schema::Response {
        schema::Response {
            id: "r1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "gpt-x".into(),
            choices: vec![],
            usage: None,
            extra: schema::Extra::default(),
            audio: None,
        }
    }

    fn stub_request() -> schema::Request {
        schema::Request {
            provider: schema::Provider::OpenAI,
            model: "gpt-x".into(),
            input: schema::Input::Chat { messages: vec![] },
            params: None,
            fallbacks: vec![],
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_retriable_error() {
        let upstream = Arc::new(StubUpstream {
            calls: AtomicUsize::new(0),
            fail_primary: true,
        });
        let dispatcher = Dispatcher::new(upstream.clone(), vec![]);
        let mut req = stub_request();
        req.fallbacks.push(schema::Fallback {
            provider: schema::Provider::Anthropic,
            model: "claude-y".into(),
        });
        let mut ctx = RequestContext::new("req-1", "POST", Utc::now());
        let result = dispatcher.chat_completion(&mut ctx, req).await;
        assert!(result.is_ok());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_fallback_on_non_retriable_error() {
        struct AlwaysFails;
        #[async_trait]
        impl UpstreamClient for AlwaysFails {
            async fn chat_completion(&self, _req: &schema::Request) -> Result<schema::Response, GatewayError> {
                Err(GatewayError::Upstream {
                    status: Some(400),
                    message: "bad request".into(),
                    retriable: false,
                })
            }
        }
        let dispatcher = Dispatcher::new(Arc::new(AlwaysFails), vec![]);
        let mut req = stub_request();
        req.fallbacks.push(schema::Fallback {
            provider: schema::Provider::Anthropic,
            model: "claude-y".into(),
        });
        let mut ctx = RequestContext::new("req-1", "POST", Utc::now());
        let result = dispatcher.chat_completion(&mut ctx, req).await;
        assert!(result.is_err());
    }
}
