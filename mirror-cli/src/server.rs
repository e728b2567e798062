//! HTTP front end: one download route backed by the orchestrator

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use crates_mirror_engine::{ByteStream, Download, DownloadOrchestrator};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppError;

pub const DOWNLOAD_ROUTE: &str = "/api/v1/crates/{name}/{version}/download";

pub fn router(mirror: Arc<DownloadOrchestrator>) -> Router {
    Router::new()
        .route(DOWNLOAD_ROUTE, get(download))
        .layer(TraceLayer::new_for_http())
        .with_state(mirror)
}

/// Serve until Ctrl-C
pub async fn serve(listener: TcpListener, mirror: Arc<DownloadOrchestrator>) -> Result<(), AppError> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, cache_root = %mirror.layout().root().display(), "Mirror listening");

    axum::serve(listener, router(mirror))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Mirror stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining connections");
}

async fn download(
    State(mirror): State<Arc<DownloadOrchestrator>>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    match mirror.get(&name, &version).await {
        Ok(Download::Cached { body, len }) => tarball(body, Some(len)),
        Ok(Download::Fetched {
            body,
            content_length,
        }) => tarball(body, content_length),
        Ok(Download::Forbidden) => StatusCode::FORBIDDEN.into_response(),
        Ok(Download::Unavailable(StatusCode::NOT_FOUND)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Download::Unavailable(status)) => {
            warn!(%name, %version, %status, "Download location unavailable");
            StatusCode::BAD_GATEWAY.into_response()
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                warn!(%name, %version, error = %e, "Download failed");
            }
            status.into_response()
        }
    }
}

fn tarball(body: ByteStream, content_length: Option<u64>) -> Response {
    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(len) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}
