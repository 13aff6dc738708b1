//! Outbound push to sinks
//!
//! Every payload is one HTTP POST to `{sink}/{stream}` with an octet-stream
//! body. There is no framing: sinks tell messages apart by arrival order.
//! Only the first message of a relay (the container metadata) carries a
//! leading marker byte, [`METADATA_MARKER`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;

use crate::error::TransportError;

/// Leading byte of the metadata message
pub const METADATA_MARKER: u8 = 0x09;

/// Pushes payloads to sinks
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one payload. A failure is final; callers do not retry.
    ///
    /// The sink's reply status is not a failure.
    async fn send(&self, sink: &str, stream: &str, payload: Bytes) -> Result<(), TransportError>;
}

/// Destination URL for a stream on a sink
pub fn sink_endpoint(sink: &str, stream: &str) -> String {
    format!("{}/{}", sink.trim_end_matches('/'), stream)
}

/// Payload of the metadata message: the marker byte followed by `metadata`
pub fn metadata_message(metadata: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + metadata.len());
    buf.put_u8(METADATA_MARKER);
    buf.put_slice(metadata.as_bytes());
    buf.freeze()
}

/// HTTP POST transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests fail after `timeout` (none if `None`)
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, sink: &str, stream: &str, payload: Bytes) -> Result<(), TransportError> {
        let url = sink_endpoint(sink, stream);
        let len = payload.len();

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        // Only a failed request ends the relay; sinks keep receiving
        // whatever status they answer
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, bytes = len, "Sink rejected payload");
            return Ok(());
        }

        tracing::trace!(url = %url, bytes = len, "Payload delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Bytes as Body, extract::Path, http::StatusCode, routing::post, Router};
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_sink_endpoint() {
        assert_eq!(sink_endpoint("http://sink-a", "cam1"), "http://sink-a/cam1");
        assert_eq!(sink_endpoint("http://sink-a/", "cam1"), "http://sink-a/cam1");
        assert_eq!(
            sink_endpoint("http://sink-a/api/streams", "cam1"),
            "http://sink-a/api/streams/cam1"
        );
    }

    #[test]
    fn test_metadata_message() {
        let message = metadata_message("video/x-flv");
        assert_eq!(message[0], 0x09);
        assert_eq!(&message[1..], b"video/x-flv");
    }

    async fn spawn_sink(status: StatusCode) -> (String, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&received);
        let app = Router::new().route(
            "/{stream}",
            post(move |Path(stream): Path<String>, body: Body| {
                let store = Arc::clone(&store);
                async move {
                    store.lock().push((stream, body.to_vec()));
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (format!("http://{}", addr), received)
    }

    #[tokio::test]
    async fn test_http_transport_posts_payload() {
        let (sink, received) = spawn_sink(StatusCode::OK).await;
        let transport = HttpTransport::new(Some(Duration::from_secs(5))).unwrap();

        transport
            .send(&sink, "cam1", Bytes::from_static(b"\x09meta"))
            .await
            .unwrap();
        transport
            .send(&sink, "cam1", Bytes::from_static(b"init"))
            .await
            .unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], ("cam1".to_string(), b"\x09meta".to_vec()));
        assert_eq!(received[1].1, b"init".to_vec());
    }

    #[tokio::test]
    async fn test_http_transport_ignores_error_status() {
        let (sink, received) = spawn_sink(StatusCode::SERVICE_UNAVAILABLE).await;
        let transport = HttpTransport::new(None).unwrap();

        transport
            .send(&sink, "cam1", Bytes::from_static(b"frag1"))
            .await
            .unwrap();
        transport
            .send(&sink, "cam1", Bytes::from_static(b"frag2"))
            .await
            .unwrap();

        assert_eq!(received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(None).unwrap();
        let result = transport
            .send(&format!("http://{}", addr), "cam1", Bytes::new())
            .await;
        assert!(matches!(result, Err(TransportError::Request { .. })));
    }
}
