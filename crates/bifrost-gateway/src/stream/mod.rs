//! Streaming Accumulator — C5 (spec.md §4.5).
//!
//! One [`Accumulator`] per in-flight streaming request, keyed by request
//! ID, merges upstream chunks into a running canonical response so the
//! dispatcher's post-hooks (cost accounting, logging) see the same shape
//! whether the call streamed or not. A background sweep drops
//! accumulators that have gone quiet — a client that disconnects mid-
//! stream must not leak memory forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::schema;

/// Accumulators older than this with no terminal chunk are dropped by the
/// sweep (spec.md §4.5 "idle accumulators").
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Sweep cadence (spec.md §4.5).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Merge state for one request's chunk stream (spec.md §4.5).
pub struct Accumulator {
    pub object: String,
    pub model: String,
    pub choices: HashMap<u32, ChoiceBuffer>,
    pub usage: Option<schema::Usage>,
    pub is_complete: bool,
    pub last_seen: DateTime<Utc>,
    pub final_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct ChoiceBuffer {
    pub role: Option<schema::Role>,
    pub text: String,
    pub refusal: String,
    pub tool_calls: Vec<schema::ToolCall>,
    pub finish_reason: Option<String>,
}

impl ChoiceBuffer {
    /// Tool-call deltas match by `id` (spec.md §4.5): a new id appends a
    /// fresh call, a repeated id concatenates `function.arguments` into the
    /// matching entry. A delta with no `id` at all falls back to OpenAI's
    /// index-based fragment framing and continues whichever call arrived
    /// most recently.
    fn merge_tool_call(&mut self, call: schema::ToolCall) {
        if let Some(id) = &call.id {
            if let Some(existing) = self.tool_calls.iter_mut().find(|c| c.id.as_ref() == Some(id)) {
                existing.function.arguments.push_str(&call.function.arguments);
                return;
            }
            self.tool_calls.push(call);
            return;
        }
        match self.tool_calls.last_mut() {
            Some(last) => last.function.arguments.push_str(&call.function.arguments),
            None => self.tool_calls.push(call),
        }
    }
}

impl Accumulator {
    fn new(model: impl Into<String>, now: DateTime<Utc>) -> Self {
        Accumulator {
            object: "chat.completion.chunk".to_string(),
            model: model.into(),
            choices: HashMap::new(),
            usage: None,
            is_complete: false,
            last_seen: now,
            final_timestamp: None,
        }
    }

    /// Fold one upstream chunk in. A chunk finalizes the stream once it
    /// carries a `finish_reason` OR a non-empty usage block (spec.md §4.5
    /// "Finalization").
    pub fn ingest(&mut self, chunk: schema::Response) {
        self.last_seen = Utc::now();
        if !chunk.model.is_empty() {
            self.model = chunk.model;
        }
        for choice in &chunk.choices {
            let buf = self.choices.entry(choice.index).or_default();
            match &choice.content {
                schema::ChoiceContent::Delta { delta } | schema::ChoiceContent::Message { message: delta } => {
                    if buf.role.is_none() {
                        buf.role = Some(delta.role);
                    }
                    if let Some(text) = delta.content.as_str() {
                        buf.text.push_str(text);
                    }
                    if let Some(extra) = &delta.assistant {
                        if let Some(refusal) = &extra.refusal {
                            buf.refusal.push_str(refusal);
                        }
                        for call in extra.tool_calls.iter().cloned() {
                            buf.merge_tool_call(call);
                        }
                    }
                },
                schema::ChoiceContent::Embedding { .. } => {},
            }
            if choice.finish_reason.is_some() {
                buf.finish_reason = choice.finish_reason.clone();
            }
        }
        if let Some(usage) = chunk.usage {
            if usage.is_non_empty() {
                self.usage = Some(usage);
            }
        }

        let finished_by_reason = self.choices.values().any(|c| c.finish_reason.is_some());
        let finished_by_usage = self.usage.as_ref().is_some_and(schema::Usage::is_non_empty);
        if finished_by_reason || finished_by_usage {
            self.is_complete = true;
            self.final_timestamp = Some(self.last_seen);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Latency from accumulator creation to the terminal chunk, once one
    /// has arrived (spec.md §4.5 "latency computation").
    pub fn latency(&self, started_at: DateTime<Utc>) -> Option<Duration> {
        self.final_timestamp
            .and_then(|end| end.signed_duration_since(started_at).to_std().ok())
    }

    /// Render the merged state back into one canonical response, as the
    /// dispatcher's post-hooks expect (spec.md §4.5).
    pub fn to_response(&self, id: &str) -> schema::Response {
        let mut indices: Vec<_> = self.choices.keys().copied().collect();
        indices.sort_unstable();
        let choices = indices
            .into_iter()
            .map(|idx| {
                let buf = &self.choices[&idx];
                let mut message = schema::Message {
                    role: buf.role.unwrap_or(schema::Role::Assistant),
                    content: schema::Content::text(buf.text.clone()),
                    assistant: None,
                    tool: None,
                };
                if !buf.refusal.is_empty() || !buf.tool_calls.is_empty() {
                    message.assistant = Some(schema::AssistantExtra {
                        tool_calls: buf.tool_calls.clone(),
                        thought: None,
                        refusal: if buf.refusal.is_empty() { None } else { Some(buf.refusal.clone()) },
                    });
                }
                schema::Choice {
                    index: idx,
                    content: schema::ChoiceContent::Message { message },
                    finish_reason: buf.finish_reason.clone(),
                    stop_string: None,
                }
            })
            .collect();

        schema::Response {
            id: id.to_string(),
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: self.model.clone(),
            choices,
            usage: self.usage.clone(),
            extra: schema::Extra::default(),
            audio: None,
        }
    }
}

/// A single accumulator guarded by its own mutex, so concurrent chunk
/// delivery for one request serializes without blocking other requests
/// (spec.md §4.5 "ordering guarantee").
#[derive(Clone)]
pub struct AccumulatorHandle {
    inner: Arc<Mutex<Accumulator>>,
}

impl AccumulatorHandle {
    pub fn ingest(&self, chunk: schema::Response) {
        self.inner.lock().ingest(chunk);
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().is_complete()
    }

    pub fn to_response(&self, id: &str) -> schema::Response {
        self.inner.lock().to_response(id)
    }
}

/// Registry of in-flight accumulators keyed by request ID (spec.md §4.5).
#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<HashMap<String, Arc<Mutex<Accumulator>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, request_id: String) -> AccumulatorHandle {
        let now = Utc::now();
        let entry = self
            .inner
            .lock()
            .entry(request_id)
            .or_insert_with(|| Arc::new(Mutex::new(Accumulator::new(String::new(), now))))
            .clone();
        AccumulatorHandle { inner: entry }
    }

    pub fn finish(&self, request_id: &str) {
        self.inner.lock().remove(request_id);
    }

    /// Sweep tick (spec.md §4.5 "30-second cadence"): drop any
    /// accumulator whose last chunk is older than [`IDLE_TIMEOUT`].
    pub fn sweep(&self, now: DateTime<Utc>) {
        self.inner.lock().retain(|_, acc| {
            let last_seen = acc.lock().last_seen;
            now.signed_duration_since(last_seen)
                .to_std()
                .map(|elapsed| elapsed < IDLE_TIMEOUT)
                .unwrap_or(true)
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
