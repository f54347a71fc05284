//! Headless tether demo server.
//!
//! Run with: cargo run -p tether-server-demo
//!
//! Environment:
//! - `TETHER_BIND` - listen address (default 127.0.0.1:3000)
//! - `TETHER_AGENT_CMD` - agent CLI command line (default `claude` with
//!   stream-json stdio)
//! - `RUST_LOG` - tracing filter (default `info`)

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use tether_agent::{AgentAdapter, AgentCommand};
use tether_core::{AdapterRegistry, EventStore, SessionAdapter};
use tether_pty::ProcessAdapter;
use tether_session::{MemoryRepository, Orchestrator};
use tether_transport::websocket::{self, AttachPolicy};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let agent_command = match std::env::var("TETHER_AGENT_CMD") {
        Ok(line) => AgentCommand::parse(&line).context("invalid TETHER_AGENT_CMD")?,
        Err(_) => AgentCommand::default(),
    };

    let registry = AdapterRegistry::new()
        .with(Arc::new(ProcessAdapter::new()) as Arc<dyn SessionAdapter>)
        .with(Arc::new(AgentAdapter::new(agent_command)) as Arc<dyn SessionAdapter>);
    tracing::info!(kinds = ?registry.kinds(), "registered session adapters");

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(MemoryRepository::new()),
        registry,
        Arc::new(EventStore::new()),
    ));
    orchestrator.reconcile_startup().await?;

    let app = websocket::router(Arc::clone(&orchestrator), AttachPolicy::default())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind = std::env::var("TETHER_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid TETHER_BIND address {bind:?}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    tracing::info!("Shutting down; pausing active sessions");
    orchestrator.cleanup().await;

    Ok(())
}
