//! Lifecycle events emitted while a call is in flight.
//!
//! Every call can carry one [`TelemetrySink`]. Events for a call arrive in
//! lifecycle order:
//!
//! ```text
//! RequestStreamInitialised -> SocketObtained -> [ConnectionEstablished]
//!     -> RequestStreamEnded -> ResponseStreamReceived
//! ```
//!
//! A failure at any point emits a single `RequestError` and nothing after it.
//! `ConnectionEstablished` is only emitted for freshly opened sockets.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use url::Url;

use crate::error::HttpError;
use crate::options::RequestOptions;

/// Lifecycle stage an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RequestStreamInitialised,
    SocketObtained,
    ConnectionEstablished,
    RequestStreamEnded,
    ResponseStreamReceived,
    RequestError,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::RequestStreamInitialised => "REQUEST_STREAM_INITIALISED",
            EventType::SocketObtained => "SOCKET_OBTAINED",
            EventType::ConnectionEstablished => "CONNECTION_ESTABLISHED",
            EventType::RequestStreamEnded => "REQUEST_STREAM_ENDED",
            EventType::ResponseStreamReceived => "RESPONSE_STREAM_RECEIVED",
            EventType::RequestError => "REQUEST_ERROR",
        };
        f.write_str(name)
    }
}

/// Payload attached to `RequestStreamInitialised`.
#[derive(Debug, Clone)]
pub enum EventData {
    Request {
        /// Fully resolved target.
        url: Url,
        /// Merged options, including any injected `content-length`.
        options: RequestOptions,
    },
}

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub timestamp: Instant,
    pub kind: EventType,
    pub data: Option<EventData>,
    /// Set on `RequestError` only.
    pub error: Option<HttpError>,
}

impl TelemetryEvent {
    pub(crate) fn new(kind: EventType) -> Self {
        Self {
            timestamp: Instant::now(),
            kind,
            data: None,
            error: None,
        }
    }

    pub(crate) fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn with_error(mut self, error: HttpError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Receiver of call lifecycle events.
///
/// Implementations are invoked synchronously on the task driving the call and
/// must not block. A panicking sink is logged and otherwise ignored.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    fn emit(&self, event: TelemetryEvent) {
        (**self).emit(event);
    }
}

impl TelemetrySink for tokio::sync::mpsc::UnboundedSender<TelemetryEvent> {
    fn emit(&self, event: TelemetryEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct TelemetryRecorder {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl TelemetryRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Recorded event types, in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for TelemetryRecorder {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
