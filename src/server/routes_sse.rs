//! Per-job progress streams over server-sent events.

use crate::error::Error;
use crate::server::AppContext;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/jobs/:id/events", get(job_events))
}

/// Stream every state change of one job as SSE events.
///
/// The first event is always the current snapshot, so a client attaching
/// mid-flight never starts blind. The stream ends once the job reaches a
/// terminal state (or is removed); subscribing to an already-terminal job
/// yields exactly the final snapshot.
async fn job_events(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let rx = ctx
        .store
        .subscribe(id)
        .await
        .ok_or_else(|| Error::not_found(format!("job {id}")))?;

    let stream = ReceiverStream::new(rx).map(|job| {
        let data = serde_json::to_string(&job)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {e}"}}"#));
        Ok::<_, std::convert::Infallible>(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
