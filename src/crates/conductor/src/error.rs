//! Service errors and their HTTP envelope.
//!
//! Every error leaving the service layer maps onto a JSON body
//! `{"error": kind, "message": text}` with the matching status code:
//! 404 for unknown resources, 409 for multitasking-policy conflicts,
//! 422 for invalid input, 500 for everything else.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use stategraph_core::GraphError;
use thiserror::Error;

/// Convenience result type using [`ConductorError`].
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Errors surfaced by the run queue, registries and handlers.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Unknown assistant, thread, run or checkpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// A multitasking policy rejected the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request payload is invalid.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The engine failed; carries the original cause.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The checkpointer failed outside a run.
    #[error(transparent)]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ConductorError {
    /// Machine-readable kind used in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::NotFound(_) => "not_found",
            ConductorError::Conflict(_) => "conflict",
            ConductorError::Invalid(_) => "invalid_request",
            ConductorError::Graph(err) => err.kind(),
            ConductorError::Checkpoint(_) => "checkpoint_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ConductorError::NotFound(_) => StatusCode::NOT_FOUND,
            ConductorError::Conflict(_) => StatusCode::CONFLICT,
            ConductorError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ConductorError::Graph(GraphError::InvalidInput(_))
            | ConductorError::Graph(GraphError::InvalidUpdate(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ConductorError::Checkpoint(stategraph_checkpoint::CheckpointError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ConductorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
