//! Response transforms.
//!
//! A transform drains a [`Response`] completely, which also hands its
//! connection back to the agent, and reshapes it into a
//! [`TransformedResponse`].
//!
//! Only genuine [`Response`] handles are accepted; the argument type rules
//! out anything else at compile time.

use bytes::Bytes;
use http::HeaderMap;
use serde::de::DeserializeOwned;

use crate::error::HttpError;
use crate::response::Response;

/// Coarse bucket of a numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Unknown,
    Informational,
    Successful,
    Redirection,
    BadRequest,
    ServerError,
}

/// Classify a status code. Total over its input.
///
/// `None` and `0` are `Unknown`; anything outside `100..500` that is not
/// covered by the lower ranges is a `ServerError`.
#[must_use]
pub fn status_class(code: Option<u16>) -> StatusClass {
    match code {
        None | Some(0) => StatusClass::Unknown,
        Some(100..=199) => StatusClass::Informational,
        Some(200..=299) => StatusClass::Successful,
        Some(300..=399) => StatusClass::Redirection,
        Some(400..=499) => StatusClass::BadRequest,
        Some(_) => StatusClass::ServerError,
    }
}

/// Fully drained response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedResponse<T> {
    pub headers: HeaderMap,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub status_class: StatusClass,
    pub data: T,
}

impl<T> TransformedResponse<T> {
    /// Replace the payload, keeping the head.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransformedResponse<U> {
        TransformedResponse {
            headers: self.headers,
            status_code: self.status_code,
            status_message: self.status_message,
            status_class: self.status_class,
            data: f(self.data),
        }
    }
}

/// Drain `response` into one contiguous buffer.
///
/// # Errors
/// [`HttpError::PrematureClose`] if the connection drops while draining.
pub async fn to_buffer_response(response: Response) -> Result<TransformedResponse<Bytes>, HttpError> {
    let status_code = Some(response.status().as_u16());
    let status_message = Some(response.status_message().to_owned()).filter(|m| !m.is_empty());
    let headers = response.headers().clone();
    let data = response.bytes().await?;

    Ok(TransformedResponse {
        headers,
        status_code,
        status_message,
        status_class: status_class(status_code),
        data,
    })
}

/// Input accepted by [`to_json_response`].
#[derive(Debug)]
pub enum JsonSource {
    Raw(Response),
    Buffered(TransformedResponse<Bytes>),
}

impl From<Response> for JsonSource {
    fn from(response: Response) -> Self {
        JsonSource::Raw(response)
    }
}

impl From<TransformedResponse<Bytes>> for JsonSource {
    fn from(buffered: TransformedResponse<Bytes>) -> Self {
        JsonSource::Buffered(buffered)
    }
}

/// Parse a response payload as JSON, buffering it first when needed.
///
/// # Errors
/// - [`HttpError::EmptyBody`] for a zero-length payload
/// - [`HttpError::Parse`] for malformed JSON
/// - anything [`to_buffer_response`] returns for a raw response
pub async fn to_json_response<T: DeserializeOwned>(
    source: impl Into<JsonSource>,
) -> Result<TransformedResponse<T>, HttpError> {
    let buffered = match source.into() {
        JsonSource::Raw(response) => to_buffer_response(response).await?,
        JsonSource::Buffered(buffered) => buffered,
    };
    if buffered.data.is_empty() {
        return Err(HttpError::EmptyBody);
    }
    let data = serde_json::from_slice(&buffered.data)?;
    Ok(buffered.map(|_| data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(Some(100)), StatusClass::Informational);
        assert_eq!(status_class(Some(200)), StatusClass::Successful);
        assert_eq!(status_class(Some(301)), StatusClass::Redirection);
        assert_eq!(status_class(Some(404)), StatusClass::BadRequest);
        assert_eq!(status_class(Some(500)), StatusClass::ServerError);
        assert_eq!(status_class(Some(599)), StatusClass::ServerError);
        assert_eq!(status_class(Some(0)), StatusClass::Unknown);
        assert_eq!(status_class(None), StatusClass::Unknown);
    }

    #[tokio::test]
    async fn buffer_response_for_no_content() {
        let response = Response::from_bytes(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        let buffered = to_buffer_response(response).await.unwrap();

        assert!(buffered.data.is_empty());
        assert_eq!(buffered.status_code, Some(204));
        assert_eq!(buffered.status_message.as_deref(), Some("No Content"));
        assert_eq!(buffered.status_class, StatusClass::Successful);
    }

    #[tokio::test]
    async fn json_from_raw_response() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        let response = Response::from_bytes(StatusCode::OK, headers, Bytes::from_static(br#"{"foo":"bar"}"#));

        let parsed: TransformedResponse<serde_json::Value> = to_json_response(response).await.unwrap();

        assert_eq!(parsed.data, json!({"foo": "bar"}));
        assert_eq!(parsed.headers["content-type"], "application/json");
        assert_eq!(parsed.status_class, StatusClass::Successful);
    }

    #[tokio::test]
    async fn json_from_buffered_response_is_repeatable() {
        let buffered = TransformedResponse {
            headers: HeaderMap::new(),
            status_code: Some(404),
            status_message: None,
            status_class: StatusClass::BadRequest,
            data: Bytes::from_static(br#"{"error":"missing"}"#),
        };

        let first: TransformedResponse<serde_json::Value> = to_json_response(buffered.clone()).await.unwrap();
        let second: TransformedResponse<serde_json::Value> = to_json_response(buffered).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status_class, StatusClass::BadRequest);
    }

    #[tokio::test]
    async fn json_on_empty_body_fails() {
        let response = Response::from_bytes(StatusCode::OK, HeaderMap::new(), Bytes::new());
        let err = to_json_response::<serde_json::Value>(response).await.unwrap_err();
        assert!(matches!(err, HttpError::EmptyBody));
        assert_eq!(err.to_string(), "cannot convert empty buffer to JSON");
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let response = Response::from_bytes(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{not json"));
        let err = to_json_response::<serde_json::Value>(response).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }
}
