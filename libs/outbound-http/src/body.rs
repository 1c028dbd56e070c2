use std::any::Any;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::Stream;

use crate::error::HttpError;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Byte source a caller can hand over as a streamed request payload.
pub type ByteStream = BoxStream<Result<Bytes, io::Error>>;

const NOT_CONSUMABLE: &str = "body must be one of: stream, buffer, string";

/// Request payload accepted by the client.
///
/// A payload is consumed exactly once per call; the stream variant is moved
/// into the outbound request and drained as the transport accepts data.
pub enum Consumable {
    /// In-memory byte buffer.
    Bytes(Bytes),
    /// Text payload, sent as UTF-8.
    Text(String),
    /// Streamed byte source. Errors abort the in-flight request.
    Stream(ByteStream),
}

impl std::fmt::Debug for Consumable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Consumable::Bytes(bytes) => f.debug_tuple("Consumable::Bytes").field(&bytes.len()).finish(),
            Consumable::Text(text) => f.debug_tuple("Consumable::Text").field(&text.len()).finish(),
            Consumable::Stream(_) => write!(f, "Consumable::Stream(..)"),
        }
    }
}

impl Consumable {
    /// Wrap any fallible byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Consumable::Stream(Box::pin(stream))
    }

    /// Exact payload length, known for the buffered variants only.
    ///
    /// Streams are never measured; callers that need a `content-length`
    /// for a stream must set the header themselves.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Consumable::Bytes(bytes) => Some(bytes.len() as u64),
            Consumable::Text(text) => Some(text.len() as u64),
            Consumable::Stream(_) => None,
        }
    }

    /// Classify a dynamically typed value and take ownership of it.
    ///
    /// Accepts `Consumable`, `Bytes`, `Vec<u8>`, `&'static [u8]`, `String`,
    /// `&'static str` and [`ByteStream`].
    ///
    /// Type erasure keeps the array length in the type, so a byte-string
    /// literal must be sliced first: `Box::new(&b"abc"[..])`. The typed
    /// `From` conversions take `b"abc"` as is.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidArgument`] when the value is none of those.
    pub fn try_from_any(value: Box<dyn Any + Send>) -> Result<Self, HttpError> {
        let value = match value.downcast::<Consumable>() {
            Ok(consumable) => return Ok(*consumable),
            Err(value) => value,
        };
        let value = match value.downcast::<Bytes>() {
            Ok(bytes) => return Ok(Consumable::Bytes(*bytes)),
            Err(value) => value,
        };
        let value = match value.downcast::<Vec<u8>>() {
            Ok(bytes) => return Ok(Consumable::Bytes(Bytes::from(*bytes))),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static [u8]>() {
            Ok(bytes) => return Ok(Consumable::Bytes(Bytes::from_static(*bytes))),
            Err(value) => value,
        };
        let value = match value.downcast::<String>() {
            Ok(text) => return Ok(Consumable::Text(*text)),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static str>() {
            Ok(text) => return Ok(Consumable::Text((*text).to_owned())),
            Err(value) => value,
        };
        match value.downcast::<ByteStream>() {
            Ok(stream) => Ok(Consumable::Stream(*stream)),
            Err(_) => Err(HttpError::invalid_argument(NOT_CONSUMABLE)),
        }
    }
}

/// Whether `value` is one of the payload shapes [`Consumable::try_from_any`] accepts.
#[must_use]
pub fn is_consumable(value: &(dyn Any + Send)) -> bool {
    value.is::<Consumable>()
        || value.is::<Bytes>()
        || value.is::<Vec<u8>>()
        || value.is::<&'static [u8]>()
        || value.is::<String>()
        || value.is::<&'static str>()
        || value.is::<ByteStream>()
}

/// Guard form of [`is_consumable`].
///
/// # Errors
/// Returns [`HttpError::InvalidArgument`] when the value is not a payload.
pub fn assert_consumable(value: &(dyn Any + Send)) -> Result<(), HttpError> {
    if is_consumable(value) {
        Ok(())
    } else {
        Err(HttpError::invalid_argument(NOT_CONSUMABLE))
    }
}

impl From<String> for Consumable {
    fn from(s: String) -> Self {
        Consumable::Text(s)
    }
}

impl From<&str> for Consumable {
    fn from(s: &str) -> Self {
        Consumable::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Consumable {
    fn from(v: Vec<u8>) -> Self {
        Consumable::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Consumable {
    fn from(v: &'static [u8]) -> Self {
        Consumable::Bytes(Bytes::from_static(v))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Consumable {
    fn from(v: &'static [u8; N]) -> Self {
        Consumable::Bytes(Bytes::from_static(v))
    }
}

impl From<Bytes> for Consumable {
    fn from(b: Bytes) -> Self {
        Consumable::Bytes(b)
    }
}

impl From<ByteStream> for Consumable {
    fn from(stream: ByteStream) -> Self {
        Consumable::Stream(stream)
    }
}
