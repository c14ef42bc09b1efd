//! Tus Routes
//!
//! Adapts axum requests to the protocol handler.
//!
//! Endpoints (relative to the configured upload path):
//! - OPTIONS / - Server capabilities
//! - POST / - Create an upload
//! - HEAD /:file_id - Current offset and length
//! - PATCH /:file_id - Append data
//! - DELETE /:file_id - Terminate an upload
//!
//! `X-HTTP-Method-Override` on a POST is resolved here, before dispatch.

use std::io;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;
use crate::tus::{effective_method, TusRequest, TusResponse};

// ============================================================================
// Router
// ============================================================================

/// Create the tus router mounted at `url_path`
pub fn router(url_path: &str) -> Router<AppState> {
    let base = url_path.trim_end_matches('/');

    Router::new()
        .route(base, any(collection))
        .route(&format!("{base}/"), any(collection))
        .route(&format!("{base}/:file_id"), any(upload))
}

// ============================================================================
// Handlers
// ============================================================================

/// Collection URL: OPTIONS and POST
async fn collection(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(&state, method, None, headers, body).await
}

/// Upload URL: HEAD, PATCH and DELETE
async fn upload(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(&state, method, Some(file_id), headers, body).await
}

async fn serve(
    state: &AppState,
    method: Method,
    file_id: Option<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let method = effective_method(&method, &headers);

    // Fires when the client disconnects and this future is dropped
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let body = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
        .boxed();

    let request = TusRequest::new(method, file_id, headers)
        .with_body(body)
        .with_cancellation(cancel);

    state.handler().handle(request).await.into_response()
}

// ============================================================================
// Response
// ============================================================================

impl IntoResponse for TusResponse {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => body.into_response(),
            None => Body::empty().into_response(),
        };
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}
