//! HTTP control API
//!
//! ```text
//! GET  /api/streams                  configured stream ids
//! POST /api/streams/{id}/connect     {"URL": sink}  attach a sink
//! POST /api/streams/{id}/disconnect  {"URL": sink}  detach a sink
//! ```
//!
//! Unknown stream ids answer `404 Not found`; a malformed body answers
//! `500 Internal error`.

pub mod error;
pub mod streams;

use std::future::Future;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::relay::Relay;

pub use error::ApiError;
pub use streams::SinkRequest;

pub fn create_router(relay: Relay) -> Router {
    Router::new()
        .route("/api/streams", get(streams::list_streams))
        .route("/api/streams/{id}/connect", post(streams::connect))
        .route("/api/streams/{id}/disconnect", post(streams::disconnect))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/// Serve the control API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, relay: Relay, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, streams = relay.stream_names().len(), "Control API listening");
    }

    axum::serve(listener, create_router(relay))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
