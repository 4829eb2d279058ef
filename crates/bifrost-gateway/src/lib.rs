//! Bifrost: a unified LLM gateway.
//!
//! Normalizes chat, embedding, speech, and transcription calls across
//! several vendor APIs into one canonical schema (`schema`), dispatches
//! them through a governance-aware plugin pipeline (`dispatch`,
//! `governance`), and re-renders the result back into whichever vendor
//! shape the caller asked for (`llm`, `route`, `router`).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod governance;
pub mod llm;
pub mod pricing;
pub mod route;
pub mod router;
pub mod schema;
pub mod stream;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;

use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, Plugin, UpstreamClient};
use crate::governance::GovernanceStore;
use crate::pricing::PricingTable;
use crate::route::RouteState;
use crate::stream::StreamRegistry;
use crate::telemetry::{LogStore, Metrics};

/// Everything a running gateway process needs, assembled once at
/// startup by `bifrost-app` and handed to `router::build`.
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub route_state: Arc<RouteState>,
    pub logs: Arc<LogStore>,
    pub metrics: Arc<Metrics>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, upstream: Arc<dyn UpstreamClient>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let logs = Arc::new(LogStore::new(config.request_log_capacity));
        let route_state = Arc::new(RouteState {
            dispatcher: Dispatcher::new(upstream, plugins),
            governance: Arc::new(GovernanceStore::new()),
            streams: Arc::new(StreamRegistry::new()),
            pricing: Arc::new(PricingTable::new()),
            metrics: Arc::clone(&metrics),
            logs: Arc::clone(&logs),
        });
        Gateway {
            config: Arc::new(config),
            route_state,
            logs,
            metrics,
        }
    }

    pub fn governance(&self) -> &Arc<GovernanceStore> {
        &self.route_state.governance
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.route_state.pricing
    }

    /// Spawns the `stream` module's idle-accumulator sweeper at the
    /// configured cadence (spec.md §4.5). Returns the task handle so the
    /// caller can abort it on shutdown.
    pub fn spawn_stream_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let streams = Arc::clone(&self.route_state.streams);
        let interval = self.config.stream_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                streams.sweep(chrono::Utc::now());
            }
        })
    }

    /// Spawns the governance module's budget/rate-limit resetter (spec.md
    /// §5 "Scheduling"). Runs at the same cadence as the stream sweeper
    /// for simplicity; a real deployment might tune them independently.
    pub fn spawn_governance_resetter(&self) -> tokio::task::JoinHandle<()> {
        let governance = Arc::clone(&self.route_state.governance);
        let interval = self.config.stream_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                governance.reset_expired(chrono::Utc::now());
            }
        })
    }

    pub fn router(&self) -> Router {
        router::build(Arc::clone(&self.route_state), Arc::clone(&self.metrics))
    }
}
