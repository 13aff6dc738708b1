//! Stream handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::registry::DetachOutcome;
use crate::relay::{Attach, Relay};

/// Body of connect and disconnect requests, echoed back on success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRequest {
    #[serde(rename = "URL", alias = "url")]
    pub url: String,
}

impl SinkRequest {
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let request: SinkRequest =
            serde_json::from_slice(body).map_err(|e| ApiError::Malformed(e.to_string()))?;
        if request.url.trim().is_empty() {
            return Err(ApiError::Malformed("empty URL".into()));
        }
        Ok(request)
    }
}

/// Sorted ids of configured streams
pub async fn list_streams(State(relay): State<Relay>) -> Json<Vec<String>> {
    Json(relay.stream_names())
}

pub async fn connect(
    State(relay): State<Relay>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SinkRequest>, ApiError> {
    // Unknown streams are reported before the body is looked at
    if !relay.stream_exists(&id) {
        return Err(ApiError::NotFound(id));
    }
    let request = SinkRequest::parse(&body)?;

    match relay.attach(&id, &request.url)? {
        Attach::Started(handle) => {
            tracing::info!(stream = %id, sink = %request.url, attachment = handle.attachment.id, "Relay started");
        }
        Attach::AlreadyAttached => {
            tracing::info!(stream = %id, sink = %request.url, "Sink already connected");
        }
    }

    Ok(Json(request))
}

pub async fn disconnect(
    State(relay): State<Relay>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SinkRequest>, ApiError> {
    if !relay.stream_exists(&id) {
        return Err(ApiError::NotFound(id));
    }
    let request = SinkRequest::parse(&body)?;

    if relay.detach(&id, &request.url)? == DetachOutcome::NotAttached {
        tracing::debug!(stream = %id, sink = %request.url, "Sink was not connected");
    }

    Ok(Json(request))
}
