//! HTTP surface: a thin layer over [`Conductor`](crate::service::Conductor).
//!
//! Handlers validate and translate; every behavior lives in the service
//! layer. Errors render as `{"error", "message"}` JSON with mapped status
//! codes.

pub mod assistants;
pub mod runs;
pub mod store;
pub mod threads;

use crate::service::Conductor;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

async fn ok() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

/// Build the full API router over a service instance.
pub fn router(conductor: Conductor) -> Router {
    Router::new()
        .route("/ok", get(ok))
        // Thread lifecycle
        .route("/threads", post(threads::create).get(threads::list))
        .route(
            "/threads/:thread_id",
            get(threads::get)
                .patch(threads::patch)
                .delete(threads::delete),
        )
        .route("/threads/:thread_id/copy", post(threads::copy))
        .route(
            "/threads/:thread_id/state",
            get(threads::state).post(threads::update_state),
        )
        .route("/threads/:thread_id/history", get(threads::history))
        // Run lifecycle
        .route(
            "/threads/:thread_id/runs",
            post(runs::create).get(runs::list),
        )
        .route("/threads/:thread_id/runs/wait", post(runs::wait))
        .route("/threads/:thread_id/runs/stream", post(runs::stream))
        .route("/threads/:thread_id/runs/:run_id", get(runs::get))
        .route("/threads/:thread_id/runs/:run_id/cancel", post(runs::cancel))
        .route("/runs/:run_id/join", get(runs::join).post(runs::join))
        .route(
            "/runs/:run_id/stream",
            get(runs::join_stream).post(runs::join_stream),
        )
        // Definition registry
        .route(
            "/assistants",
            get(assistants::list).post(assistants::create),
        )
        .route(
            "/assistants/:assistant_id",
            get(assistants::get)
                .patch(assistants::update)
                .delete(assistants::delete),
        )
        .route(
            "/assistants/:assistant_id/versions",
            get(assistants::versions),
        )
        .route("/assistants/:assistant_id/latest", get(assistants::latest))
        .route("/assistants/:assistant_id/graph", get(assistants::graph))
        .route("/assistants/:assistant_id/schemas", get(assistants::schemas))
        .route(
            "/assistants/:assistant_id/subgraphs",
            get(assistants::subgraphs),
        )
        // Cross-thread store
        .route("/store/namespaces", get(store::namespaces))
        .route("/store/search", post(store::search))
        .route(
            "/store/*path",
            put(store::put).get(store::get).delete(store::delete),
        )
        .with_state(conductor)
}
