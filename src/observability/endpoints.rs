//! Health and metrics HTTP endpoints.
//!
//! Each endpoint is an independent axum server on its own listener and
//! task. Shutdown flips a watch channel, which drives axum's graceful
//! shutdown: the listener closes, the accept loop unblocks, and the task
//! joins. A failure to bind either socket is fatal for the worker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::logging::iso8601_micros;
use super::Observability;
use crate::error::WorkerError;

pub struct EndpointServer {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    /// Actual bound address (useful when the configured port is 0).
    pub addr: SocketAddr,
}

impl EndpointServer {
    /// Serve `GET /_health`; any other path is a 404.
    pub async fn start_health(
        addr: SocketAddr,
        obs: Arc<Observability>,
    ) -> Result<Self, WorkerError> {
        let router = Router::new()
            .route("/_health", get(health_handler))
            .with_state(obs);
        Self::start(addr, router).await
    }

    /// Serve `GET /metrics`; any other path is a 404. The caller gates this
    /// on the observability-metrics flag.
    pub async fn start_metrics(
        addr: SocketAddr,
        obs: Arc<Observability>,
    ) -> Result<Self, WorkerError> {
        let router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(obs);
        Self::start(addr, router).await
    }

    async fn start(addr: SocketAddr, router: Router) -> Result<Self, WorkerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WorkerError::EndpointBind {
                addr: addr.to_string(),
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| WorkerError::EndpointBind {
                addr: addr.to_string(),
                source,
            })?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await;
        });

        Ok(Self {
            shutdown_tx,
            handle,
            addr: bound,
        })
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn health_handler(State(_obs): State<Arc<Observability>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "timestamp": iso8601_micros(Utc::now()),
    })
    .to_string();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

async fn metrics_handler(State(obs): State<Arc<Observability>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        obs.render_metrics(),
    )
}
