//! Gateway configuration — ambient stack (SPEC_FULL.md ambient-stack
//! section).
//!
//! File-based config parsing and hot-reload are explicitly out of scope
//! (spec.md Non-goals), but the injection seam for a future config
//! source still needs to exist: [`ConfigSource`] is the trait a real
//! file-watcher would implement, and [`GatewayConfig`] is held behind an
//! `arc_swap::ArcSwap` so a source can publish a new snapshot atomically
//! without readers ever observing a half-updated config.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::telemetry::LogFormat;

/// One immutable configuration snapshot. Every field a route handler or
/// background task reads comes from one `Arc<GatewayConfig>` obtained via
/// [`ConfigHandle::current`] at the top of the call, so a reload never
/// produces a response built from two different snapshots.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub log_format: LogFormat,
    pub stream_idle_timeout: Duration,
    pub stream_sweep_interval: Duration,
    pub request_log_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Json,
            stream_idle_timeout: crate::stream::IDLE_TIMEOUT,
            stream_sweep_interval: crate::stream::SWEEP_INTERVAL,
            request_log_capacity: 1000,
        }
    }
}

/// Where a [`GatewayConfig`] comes from. A static in-process source is
/// provided; file/remote sources are future work (spec.md Non-goals).
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<GatewayConfig, anyhow::Error>;
}

pub struct StaticConfigSource(pub GatewayConfig);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<GatewayConfig, anyhow::Error> {
        Ok(self.0.clone())
    }
}

/// Atomically-swappable config handle (spec.md §9 design note on
/// lock-free hot paths — reads here are the same `ArcSwap::load` pattern
/// used by the governance cache's sharded maps).
pub struct ConfigHandle {
    current: ArcSwap<GatewayConfig>,
}

impl ConfigHandle {
    pub fn new(initial: GatewayConfig) -> Self {
        ConfigHandle {
            current: ArcSwap::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<GatewayConfig> {
        self.current.load_full()
    }

    /// Publish a new snapshot loaded from `source`. A future file-watcher
    /// would call this on each detected change; nothing in this crate
    /// calls it today (spec.md Non-goals).
    pub fn reload(&self, source: &dyn ConfigSource) -> Result<(), anyhow::Error> {
        let next = source.load()?;
        self.current.store(Arc::new(next));
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        ConfigHandle::new(GatewayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_replaces_snapshot_atomically() {
        let handle = ConfigHandle::default();
        assert_eq!(handle.current().listen_addr, "0.0.0.0:8080");

        let mut next = GatewayConfig::default();
        next.listen_addr = "127.0.0.1:9090".to_string();
        handle.reload(&StaticConfigSource(next)).unwrap();

        assert_eq!(handle.current().listen_addr, "127.0.0.1:9090");
    }
}
