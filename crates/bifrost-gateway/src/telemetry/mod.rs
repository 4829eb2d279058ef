//! Telemetry — ambient logging stack (SPEC_FULL.md ambient-stack section).
//!
//! Bifrost itself only emits structured `tracing` events; turning that
//! into stdout JSON or pretty output is `bifrost-app`'s job at startup
//! (`crate::telemetry::init_subscriber` is reused there). This module
//! also keeps the small in-memory request log the admin surface reads
//! from, independent of whatever the process's tracing subscriber does
//! with the same events.

pub mod metrics;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::schema::Provider;

pub use metrics::Metrics;

/// One entry per completed request, enough for the admin surface to
/// render a live log view (SPEC_FULL.md ambient-stack section).
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub request_id: String,
    pub provider: Provider,
    pub model: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

/// Bounded ring buffer — the newest `capacity` requests, oldest dropped
/// first. Capacity is fixed at construction; this is a diagnostics tool,
/// not a durable audit log.
pub struct LogStore {
    capacity: usize,
    entries: Mutex<VecDeque<RequestLog>>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        LogStore {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, entry: RequestLog) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn recent(&self, n: usize) -> Vec<RequestLog> {
        let entries = self.entries.lock();
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogStore {
    fn default() -> Self {
        LogStore::new(1000)
    }
}

/// Output shape for the process's `tracing` subscriber: `json` for
/// production log aggregation, `pretty` for local development
/// (SPEC_FULL.md ambient-stack section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other:?}, expected json or pretty")),
        }
    }
}

/// Installs the process-wide `tracing` subscriber. Honors `RUST_LOG` via
/// [`EnvFilter`], defaulting to `info` when unset.
pub fn init_subscriber(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => registry.json().init(),
        LogFormat::Pretty => registry.pretty().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> RequestLog {
        RequestLog {
            request_id: id.to_string(),
            provider: Provider::OpenAI,
            model: "gpt-4o".into(),
            status_code: 200,
            latency_ms: 10,
            cost: 0.01,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn oldest_entry_evicted_past_capacity() {
        let store = LogStore::new(2);
        store.record(entry("a"));
        store.record(entry("b"));
        store.record(entry("c"));
        let recent = store.recent(10);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|e| e.request_id != "a"));
    }

    #[test]
    fn log_format_parses_known_values_only() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
