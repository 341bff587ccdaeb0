//! HTTP front end.
//!
//! `GET /` answers with usage text. `POST /` takes a signed event as the raw
//! request body and answers with the signed reply, or with a plain-text error
//! whose status reflects the stage that failed.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{error, warn};

use crate::workflow::Workflow;

/// Text returned for `GET /`.
pub const USAGE: &str = "\
POST a signed Nostr event tagged [\"t\",\"anonymousface\"] whose content links an image:

  curl -X POST --data-binary @event.json http://localhost:8080/

The reply is a signed event whose content is the URL of the image with every
detected face covered.
";

/// Build the router serving [`USAGE`] and the anonymizing endpoint.
#[must_use]
pub fn router(workflow: Arc<Workflow>) -> Router {
    Router::new()
        .route("/", get(usage).post(anonymize))
        .with_state(workflow)
}

async fn usage() -> &'static str {
    USAGE
}

async fn anonymize(State(workflow): State<Arc<Workflow>>, body: Bytes) -> Response {
    let outcome = tokio::task::spawn_blocking(move || workflow.handle(&body)).await;
    match outcome {
        Ok(Ok(emitted)) => (
            [(header::CONTENT_TYPE, "application/json")],
            emitted.payload,
        )
            .into_response(),
        Ok(Err(err)) => {
            let status =
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(status = status.as_u16(), "request failed: {err}");
            } else {
                warn!(status = status.as_u16(), "request rejected: {err}");
            }
            (status, err.to_string()).into_response()
        }
        Err(join) => {
            error!("worker panicked: {join}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
