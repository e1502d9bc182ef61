//! Server-sent-events boundary.
//!
//! Each run's ordered event log maps 1:1 onto SSE frames: the chunk's
//! wire event name (already namespace-tagged, `mode|segment|…` for
//! subgraph events) becomes the `event` field and its payload the `data`
//! field. Subscribers joining mid-run replay the buffered history first,
//! so the stream ordering guarantees hold for late joiners too.

use crate::runs::{Run, RunEvent};
use axum::response::sse::Event;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

fn to_sse(event: &str, data: &serde_json::Value) -> Event {
    match Event::default().event(event).json_data(data) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize stream event");
            Event::default().event("error").data("serialization failure")
        }
    }
}

/// SSE frame stream for a run: replayed history, then live events, closed
/// after the run's terminal marker.
pub fn run_sse_stream(
    run: Arc<Run>,
) -> impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>> {
    let (tx, rx) = mpsc::channel::<RunEvent>(64);

    tokio::spawn(async move {
        let (history, mut live) = run.subscribe();
        for event in history {
            let done = matches!(event, RunEvent::Done(_));
            if tx.send(event).await.is_err() || done {
                return;
            }
        }
        loop {
            match live.recv().await {
                Ok(event) => {
                    let done = matches!(event, RunEvent::Done(_));
                    if tx.send(event).await.is_err() || done {
                        return;
                    }
                }
                // A lagged subscriber lost intermediate frames; the log
                // guarantees were already spent, so just keep following.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sse subscriber lagged behind the run");
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    ReceiverStream::new(rx).filter_map(|event| match event {
        RunEvent::Chunk { event, data } => Some(Ok(to_sse(&event, &data))),
        // The terminal marker closes the HTTP stream without a frame.
        RunEvent::Done(_) => None,
    })
}
