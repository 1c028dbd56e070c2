use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderMap, StatusCode, Version};
use http_body::Body as _;
use hyper::body::Incoming;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;

use crate::agent::PooledConnection;
use crate::body::BoxStream;
use crate::error::HttpError;

/// Response handle handed to the client's transform.
///
/// The head is available immediately; the payload is read lazily with one of
/// the consuming methods. The underlying connection goes back to its agent
/// only after the payload has been read to the end.
pub struct Response {
    status: StatusCode,
    status_message: String,
    version: Version,
    headers: HeaderMap,
    body: ResponseBody,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("status_message", &self.status_message)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

enum ResponseBody {
    Buffered(Bytes),
    Streaming(BoxStream<Result<Bytes, HttpError>>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => {
                f.debug_tuple("ResponseBody::Buffered").field(&bytes.len()).finish()
            }
            ResponseBody::Streaming(_) => write!(f, "ResponseBody::Streaming(..)"),
        }
    }
}

impl Response {
    /// Create a streaming response from components.
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        stream: BoxStream<Result<Bytes, HttpError>>,
    ) -> Self {
        Self {
            status,
            status_message: canonical_message(status),
            version: Version::HTTP_11,
            headers,
            body: ResponseBody::Streaming(stream),
        }
    }

    /// Create a response from buffered bytes.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, bytes: Bytes) -> Self {
        Self {
            status,
            status_message: canonical_message(status),
            version: Version::HTTP_11,
            headers,
            body: ResponseBody::Buffered(bytes),
        }
    }

    #[must_use]
    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = message.into();
        self
    }

    pub(crate) fn from_incoming(
        response: http::Response<Incoming>,
        connection: PooledConnection,
    ) -> Self {
        let (parts, incoming) = response.into_parts();
        let status_message = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
            .map_or_else(|| canonical_message(parts.status), str::to_owned);

        let body = if incoming.is_end_stream() {
            connection.release();
            ResponseBody::Buffered(Bytes::new())
        } else {
            ResponseBody::Streaming(Box::pin(IncomingStream {
                incoming,
                connection: Some(connection),
                done: false,
            }))
        };

        Self {
            status: parts.status,
            status_message,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase sent by the peer, or the canonical one for the status.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consume the response and return the entire body as bytes.
    ///
    /// # Errors
    /// Returns [`HttpError::PrematureClose`] if the connection drops before
    /// the payload is complete.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Consume the response and decode the body as UTF-8, replacing invalid
    /// sequences.
    ///
    /// # Errors
    /// Same as [`Response::bytes`].
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Consume the response and deserialize the body as JSON.
    ///
    /// # Errors
    /// [`HttpError::EmptyBody`] for a zero-length payload,
    /// [`HttpError::Parse`] for malformed JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        if bytes.is_empty() {
            return Err(HttpError::EmptyBody);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Convert the response into a byte stream for incremental consumption.
    pub fn into_stream(self) -> BoxStream<Result<Bytes, HttpError>> {
        match self.body {
            ResponseBody::Buffered(bytes) if bytes.is_empty() => Box::pin(futures::stream::empty()),
            ResponseBody::Buffered(bytes) => {
                Box::pin(futures::stream::once(async move { Ok(bytes) }))
            }
            ResponseBody::Streaming(stream) => stream,
        }
    }
}

fn canonical_message(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or_default().to_owned()
}

pin_project! {
    /// Data frames of an inbound body. Hands the connection back to its agent
    /// at end of stream and drops it on error.
    struct IncomingStream {
        #[pin]
        incoming: Incoming,
        connection: Option<PooledConnection>,
        done: bool,
    }
}

impl Stream for IncomingStream {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.incoming.as_mut().poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(frame))) => {
                    // Trailers carry no payload.
                    if let Ok(data) = frame.into_data() {
                        return Poll::Ready(Some(Ok(data)));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    *this.done = true;
                    drop(this.connection.take());
                    tracing::debug!(error = %err, "response body aborted");
                    return Poll::Ready(Some(Err(HttpError::premature_close(err))));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if let Some(connection) = this.connection.take() {
                        connection.release();
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_response_reads_back() {
        let response = Response::from_bytes(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(response.status_message(), "OK");

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn streaming_response_concatenates_chunks() {
        let chunks = futures::stream::iter([Ok(Bytes::from_static(b"foo")), Ok(Bytes::from_static(b"Bar"))]);
        let response = Response::new(StatusCode::CREATED, HeaderMap::new(), Box::pin(chunks));
        assert_eq!(response.text().await.unwrap(), "fooBar");
    }

    #[tokio::test]
    async fn stream_error_surfaces_from_bytes() {
        let chunks = futures::stream::iter([
            Ok(Bytes::from_static(b"partial")),
            Err(HttpError::PrematureClose { source: None }),
        ]);
        let response = Response::new(StatusCode::OK, HeaderMap::new(), Box::pin(chunks));
        let err = response.bytes().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PrematureClose);
    }

    #[tokio::test]
    async fn empty_json_body_is_rejected() {
        let response = Response::from_bytes(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        assert!(matches!(response.json::<serde_json::Value>().await, Err(HttpError::EmptyBody)));
    }

    #[test]
    fn custom_status_message_overrides_canonical() {
        let response = Response::from_bytes(StatusCode::IM_A_TEAPOT, HeaderMap::new(), Bytes::new())
            .with_status_message("Short and stout");
        assert_eq!(response.status_message(), "Short and stout");
        assert_eq!(response.version(), Version::HTTP_11);
    }
}
