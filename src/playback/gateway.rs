//! Redirect gateway
//!
//! Ephemeral local HTTP server the playlist points at. `GET /play` resolves
//! the requested file to a fresh signed URL and redirects the player there.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::resolve::MediaResolver;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct PlayQuery {
    drive_id: Option<String>,
    file_id: Option<String>,
}

/// Bind the first free localhost port at or above `start_port`
///
/// Only "address in use" moves on to the next port. Any other bind error
/// falls back to one more attempt on `start_port`.
pub async fn bind_from(start_port: u16) -> std::io::Result<TcpListener> {
    let mut port = start_port;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!(port, "port occupied, trying next");
                port = port.checked_add(1).ok_or(e)?;
            }
            Err(e) => {
                warn!(port, error = %e, "bind failed, falling back to requested port");
                return TcpListener::bind((Ipv4Addr::LOCALHOST, start_port)).await;
            }
        }
    }
}

/// Gateway routes
pub fn router(resolver: Arc<MediaResolver>) -> Router {
    Router::new()
        .route("/play", get(play_handler))
        .fallback(not_found)
        .with_state(resolver)
}

async fn play_handler(
    State(resolver): State<Arc<MediaResolver>>,
    Query(query): Query<PlayQuery>,
) -> Response {
    let (Some(drive_id), Some(file_id)) = (query.drive_id, query.file_id) else {
        return (StatusCode::BAD_REQUEST, "drive_id and file_id are required").into_response();
    };

    match resolver.resolve(&drive_id, &file_id).await {
        Ok(url) => (
            StatusCode::FOUND,
            [
                (header::LOCATION, url),
                (header::CONTENT_TYPE, "text/plain".to_string()),
            ],
        )
            .into_response(),
        Err(e) => {
            warn!(%file_id, error = %e, "gateway resolution failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// A running gateway; one per session
pub struct Gateway {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Bind from `start_port` upward and start serving
    pub async fn start(start_port: u16, resolver: Arc<MediaResolver>) -> std::io::Result<Self> {
        let listener = bind_from(start_port).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = oneshot::channel::<()>();

        let app = router(resolver);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "gateway stopped with error");
            }
        });

        info!(port, "redirect gateway listening");
        Ok(Self {
            port,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting requests and release the port
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!(port = self.port, "redirect gateway closed");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
