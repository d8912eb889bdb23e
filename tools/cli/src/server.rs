//! Local operator server: OAuth callback and thumbnail proxy.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use drivemedia_common::DriveId;
use drivemedia_drive::DriveClient;

/// Shown whenever a thumbnail cannot be served.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="120" viewBox="0 0 160 120"><rect width="160" height="120" fill="#e5e7eb"/><path d="M52 84l20-26 14 18 10-12 14 20z" fill="#9ca3af"/><circle cx="104" cy="44" r="8" fill="#9ca3af"/></svg>"##;

/// Outcome of an authorization callback, reported to whoever started the flow.
pub type Completion = Result<(), String>;

/// Shared state of the operator server.
pub struct ServerState {
    drive: Arc<DriveClient>,
    expected_state: String,
    completion: Mutex<Option<oneshot::Sender<Completion>>>,
}

impl ServerState {
    /// Create the server state.
    ///
    /// Callbacks must carry `expected_state`. The receiver resolves after the
    /// first callback that carries it.
    pub fn new(
        drive: Arc<DriveClient>,
        expected_state: impl Into<String>,
    ) -> (Arc<Self>, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Self {
            drive,
            expected_state: expected_state.into(),
            completion: Mutex::new(Some(tx)),
        });
        (state, rx)
    }

    async fn complete(&self, outcome: Completion) {
        if let Some(tx) = self.completion.lock().await.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Query parameters of the OAuth redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Build the router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/callback", get(callback))
        .route("/thumbnail/{file_id}", get(thumbnail))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn callback(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if params.state.as_deref() != Some(state.expected_state.as_str()) {
        warn!("Rejected callback with unexpected state");
        return (StatusCode::FORBIDDEN, "Invalid state parameter").into_response();
    }

    if let Some(error) = params.error {
        warn!("Authorization denied: {}", error);
        state
            .complete(Err(format!("authorization denied: {}", error)))
            .await;
        return (
            StatusCode::BAD_REQUEST,
            format!("Authorization denied: {}", error),
        )
            .into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    match state.drive.tokens().complete_authorization(&code).await {
        Ok(()) => {
            state.complete(Ok(())).await;
            (
                StatusCode::OK,
                "Connected to Google Drive. You can close this window.",
            )
                .into_response()
        }
        Err(e) => {
            warn!("Authorization failed: {}", e);
            let message = e.to_string();
            state.complete(Err(message.clone())).await;
            (StatusCode::BAD_GATEWAY, message).into_response()
        }
    }
}

async fn thumbnail(
    State(state): State<Arc<ServerState>>,
    Path(file_id): Path<String>,
) -> Response {
    let Ok(file_id) = DriveId::new(file_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid file id").into_response();
    };

    match state.drive.thumbnail(&file_id).await {
        Ok(thumb) => (
            [
                (header::CONTENT_TYPE, thumb.content_type),
                (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
            ],
            thumb.body,
        )
            .into_response(),
        Err(e) => {
            debug!(file_id = %file_id, "Serving placeholder thumbnail: {}", e);
            (
                [
                    (header::CONTENT_TYPE, "image/svg+xml"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                PLACEHOLDER_SVG,
            )
                .into_response()
        }
    }
}
