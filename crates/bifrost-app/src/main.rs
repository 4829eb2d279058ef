//! `bifrost` — the gateway binary.
//!
//! Parses CLI flags, builds a [`bifrost_gateway::Gateway`], starts the
//! background sweepers, and serves the router until a shutdown signal
//! arrives.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bifrost_gateway::config::GatewayConfig;
use bifrost_gateway::dispatch::UpstreamClient;
use bifrost_gateway::error::GatewayError;
use bifrost_gateway::schema;
use bifrost_gateway::telemetry::LogFormat;
use bifrost_gateway::Gateway;
use clap::Parser;

/// clap's `ValueEnum` can't be implemented directly on
/// `bifrost_gateway::telemetry::LogFormat` (neither the trait nor the
/// type is local to this crate), so the CLI gets its own mirror enum and
/// converts.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(v: CliLogFormat) -> Self {
        match v {
            CliLogFormat::Json => LogFormat::Json,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "bifrost", about = "A unified LLM gateway")]
struct Args {
    #[arg(long, env = "BIFROST_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    #[arg(long, env = "BIFROST_LOG_FORMAT", value_enum, default_value = "json")]
    log_format: CliLogFormat,
}

/// Placeholder upstream client until real per-provider HTTP clients are
/// wired in; returns a 501 for every call so routing, governance, and
/// streaming plumbing can be exercised end-to-end without live vendor
/// credentials.
struct UnimplementedUpstream;

#[async_trait]
impl UpstreamClient for UnimplementedUpstream {
    async fn chat_completion(&self, _req: &schema::Request) -> Result<schema::Response, GatewayError> {
        Err(GatewayError::Upstream {
            status: Some(501),
            message: "no upstream client configured".to_string(),
            retriable: false,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_format: LogFormat = args.log_format.into();

    bifrost_gateway::telemetry::init_subscriber(log_format);

    let config = GatewayConfig {
        listen_addr: args.listen_addr.clone(),
        log_format,
        ..GatewayConfig::default()
    };

    let gateway = Gateway::new(config, Arc::new(UnimplementedUpstream), vec![]);
    let _stream_sweeper = gateway.spawn_stream_sweeper();
    let _governance_resetter = gateway.spawn_governance_resetter();

    let listener = tokio::net::TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("binding {}", args.listen_addr))?;

    tracing::info!(addr = %args.listen_addr, "bifrost listening");

    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving gateway router")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
