//! Reference server binary.
//!
//! Serves the API over an in-memory checkpointer and store, with a small
//! echo agent registered so the surface is explorable out of the box.
//! Real deployments construct a [`Conductor`], register their own graphs
//! and serve `api::router` the same way.

use anyhow::Context;
use clap::Parser;
use conductor::{api, Conductor, MultitaskStrategy};
use serde_json::{json, Value};
use stategraph_checkpoint::MemorySaver;
use stategraph_core::prelude::*;
use stategraph_core::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "conductor-server", about = "stategraph HTTP runtime")]
struct Args {
    /// Bind address.
    #[arg(long, env = "CONDUCTOR_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port.
    #[arg(long, env = "CONDUCTOR_PORT", default_value_t = 2024)]
    port: u16,

    /// Default multitask strategy for runs that do not name one.
    #[arg(long, env = "CONDUCTOR_MULTITASK", default_value = "enqueue")]
    multitask: String,
}

/// Minimal demo graph: appends an echo of the last human message.
fn echo_graph() -> stategraph_core::Result<CompiledGraph> {
    let mut graph = StateGraph::new();
    graph.add_append_channel("messages");
    graph.add_node_fn("echo", |state: Value, _ctx| async move {
        let last = state["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(json!({
            "messages": [{"type": "ai", "content": format!("echo: {last}")}]
        }))
    });
    graph.set_entry_point("echo");
    graph.set_finish_point("echo");
    graph.compile()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let multitask = match args.multitask.as_str() {
        "reject" => MultitaskStrategy::Reject,
        "enqueue" => MultitaskStrategy::Enqueue,
        "interrupt" => MultitaskStrategy::Interrupt,
        "rollback" => MultitaskStrategy::Rollback,
        other => anyhow::bail!("unknown multitask strategy '{other}'"),
    };

    let conductor = Conductor::new(
        Arc::new(MemorySaver::new()),
        Arc::new(MemoryStore::new()),
    )
    .with_default_multitask(multitask);
    conductor.register_graph("echo", echo_graph().context("compiling echo graph")?);

    let app = api::router(conductor)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "conductor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("serving")?;
    Ok(())
}
