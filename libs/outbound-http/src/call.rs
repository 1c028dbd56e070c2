//! Per-call orchestration.
//!
//! A call moves through `Built -> Sent -> Connected -> AwaitingResponse` and
//! settles exactly once, either when the response head arrives or on the
//! first transport failure. [`CallObserver`] owns that settled state and is
//! the only place telemetry is emitted from.

use std::any::Any;
use std::future::IntoFuture;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue, Method};
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{trace, warn};
use url::Url;

use crate::agent::{Agent, BoxError, OutboundBody, PoolKey};
use crate::body::Consumable;
use crate::client::{HttpClient, OutboundRequest, Target};
use crate::error::HttpError;
use crate::header::{APPLICATION_JSON, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use crate::options::RequestOptions;
use crate::response::Response;
use crate::telemetry::{EventData, EventType, TelemetryEvent, TelemetrySink};

enum PendingBody {
    Ready(Consumable),
    Erased(Box<dyn Any + Send>),
}

/// A call being assembled. Created by the verb methods of [`HttpClient`];
/// nothing touches the network until it is sent or awaited.
#[must_use = "a call does nothing until it is sent or awaited"]
pub struct CallBuilder<'a, T> {
    client: &'a HttpClient<T>,
    method: Method,
    target: Target,
    options: RequestOptions,
    body: Option<PendingBody>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl<T> std::fmt::Debug for CallBuilder<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBuilder")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("options", &self.options)
            .field("has_body", &self.body.is_some())
            .field("has_telemetry", &self.telemetry.is_some())
            .finish()
    }
}

impl<'a, T> CallBuilder<'a, T> {
    pub(crate) fn new(client: &'a HttpClient<T>, method: Method, target: Target) -> Self {
        Self {
            client,
            method,
            target,
            options: RequestOptions::default(),
            body: None,
            telemetry: None,
        }
    }

    /// Overlay per-call options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = self.options.merge(&options);
        self
    }

    /// Add a per-call header.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidArgument`] for an invalid name or value.
    pub fn header<K, V>(mut self, key: K, value: V) -> Result<Self, HttpError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Display,
        V::Error: std::fmt::Display,
    {
        self.options = self.options.header(key, value)?;
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Consumable>) -> Self {
        self.body = Some(PendingBody::Ready(body.into()));
        self
    }

    /// Body of a type only known at run time.
    ///
    /// The value is checked when the call is sent, before any connection is
    /// opened; see [`Consumable::try_from_any`].
    pub fn body_any(mut self, body: Box<dyn Any + Send>) -> Self {
        self.body = Some(PendingBody::Erased(body));
        self
    }

    /// Serialize `value` as the JSON payload and default `content-type` to
    /// `application/json`. A value serializing to `null` sends no body.
    ///
    /// # Errors
    /// Returns [`HttpError::Parse`] when serialization fails.
    pub fn json<B: Serialize + ?Sized>(mut self, value: &B) -> Result<Self, HttpError> {
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            self.body = None;
            return Ok(self);
        }
        self.body = Some(PendingBody::Ready(Consumable::Bytes(Bytes::from(
            serde_json::to_vec(&value)?,
        ))));
        if !self.options.headers.contains_key(CONTENT_TYPE) {
            self.options
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }
        Ok(self)
    }

    /// Observe the lifecycle of this call.
    pub fn telemetry(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.telemetry = Some(Arc::new(sink));
        self
    }

    /// Send the call and wait for it to settle.
    ///
    /// # Errors
    /// - [`HttpError::InvalidArgument`] for a bad body or target, before any I/O
    /// - [`HttpError::Configuration`] for a target with a foreign scheme
    /// - [`HttpError::Transport`] / [`HttpError::BodyStream`] for failures in flight
    /// - whatever the client's transform returns
    pub async fn send(self) -> Result<T, HttpError> {
        let CallBuilder {
            client,
            method,
            target,
            options,
            body,
            telemetry,
        } = self;

        let body = match body {
            None => None,
            Some(PendingBody::Ready(body)) => Some(body),
            Some(PendingBody::Erased(value)) => Some(Consumable::try_from_any(value)?),
        };
        let url = client.resolve(target)?;

        let mut merged = client.base_options().merge(&options);
        if let Some(len) = body.as_ref().and_then(Consumable::content_length) {
            if !merged.headers.contains_key(CONTENT_LENGTH) {
                merged.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
        }

        let observer = CallObserver::new(telemetry);
        observer.emit(
            TelemetryEvent::new(EventType::RequestStreamInitialised).with_data(EventData::Request {
                url: url.clone(),
                options: merged.clone(),
            }),
        );

        let mut outbound = OutboundRequest {
            url,
            method,
            options: merged,
        };
        if let Some(interceptor) = client.interceptor() {
            interceptor.will_send_request(&mut outbound).await;
        }

        let agent = outbound
            .options
            .agent
            .clone()
            .unwrap_or_else(|| client.agent().clone());
        let prepared = client
            .check_protocol(&outbound.url)
            .and_then(|()| PoolKey::from_url(&outbound.url))
            .and_then(|key| build_request(outbound, &agent).map(|head| (key, head)));
        let (key, request) = attach_body(prepared, body, &observer)?;

        observer.emit(TelemetryEvent::new(EventType::SocketObtained));
        let mut connection = match agent.take_idle(&key) {
            Some(connection) => connection,
            None => match agent.connect(&key).await {
                Ok(connection) => {
                    observer.emit(TelemetryEvent::new(EventType::ConnectionEstablished));
                    connection
                }
                Err(err) => return Err(observer.fail(err)),
            },
        };

        let head = match connection.send(request).await {
            Ok(head) => head,
            Err(err) => {
                drop(connection);
                let err = match observer.take_body_error() {
                    Some(body_err) => HttpError::body_stream(body_err),
                    None => HttpError::from(err),
                };
                return Err(observer.fail(err));
            }
        };

        observer.succeed();
        let response = Response::from_incoming(head, connection);
        client.apply_transform(response).await
    }
}

impl<'a, T> IntoFuture for CallBuilder<'a, T>
where
    T: Send + 'a,
{
    type Output = Result<T, HttpError>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}

fn build_request(outbound: OutboundRequest, agent: &Agent) -> Result<http::Request<()>, HttpError> {
    let OutboundRequest {
        url,
        method,
        options,
    } = outbound;

    let mut headers = options.headers;
    if !headers.contains_key(HOST) {
        let host = &url[url::Position::BeforeHost..url::Position::AfterPort];
        let host = HeaderValue::from_str(host)
            .map_err(|e| HttpError::invalid_argument(format!("invalid host '{host}': {e}")))?;
        headers.insert(HOST, host);
    }
    if !agent.config().keep_alive && !headers.contains_key(CONNECTION) {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }

    let mut request = http::Request::builder()
        .method(method)
        .uri(origin_form(&url))
        .body(())
        .map_err(|e| HttpError::invalid_argument(format!("invalid request: {e}")))?;
    *request.headers_mut() = headers;
    Ok(request)
}

/// The payload is wrapped only once the head is valid, so a call that fails
/// here never reports its body as written.
fn attach_body(
    prepared: Result<(PoolKey, http::Request<()>), HttpError>,
    body: Option<Consumable>,
    observer: &Arc<CallObserver>,
) -> Result<(PoolKey, http::Request<OutboundBody>), HttpError> {
    match prepared {
        Ok((key, head)) => Ok((key, head.map(|()| outbound_body(body, observer)))),
        Err(err) => Err(observer.fail(err)),
    }
}

fn origin_form(url: &Url) -> &str {
    &url[url::Position::BeforePath..url::Position::AfterQuery]
}

fn outbound_body(body: Option<Consumable>, observer: &Arc<CallObserver>) -> OutboundBody {
    let inner: OutboundBody = match body {
        None => Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
        Some(Consumable::Bytes(bytes)) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
        Some(Consumable::Text(text)) => Full::new(Bytes::from(text))
            .map_err(|never| match never {})
            .boxed_unsync(),
        Some(Consumable::Stream(stream)) => {
            let observer = Arc::clone(observer);
            let frames = stream.map(move |chunk| match chunk {
                Ok(data) => Ok(Frame::data(data)),
                Err(err) => {
                    let placeholder: BoxError = Box::new(io::Error::new(err.kind(), err.to_string()));
                    observer.record_body_error(err);
                    Err(placeholder)
                }
            });
            StreamBody::new(frames).boxed_unsync()
        }
    };
    ObservedBody {
        inner,
        observer: Arc::clone(observer),
        ended: false,
    }
    .boxed_unsync()
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Pending,
    Succeeded,
    Failed,
}

/// Settled state and telemetry of one call.
struct CallObserver {
    sink: Option<Arc<dyn TelemetrySink>>,
    state: Mutex<CallState>,
    body_error: Mutex<Option<io::Error>>,
}

impl CallObserver {
    fn new(sink: Option<Arc<dyn TelemetrySink>>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            state: Mutex::new(CallState::Pending),
            body_error: Mutex::new(None),
        })
    }

    /// Deliver a milestone unless the call already failed.
    fn emit(&self, event: TelemetryEvent) {
        if *self.state.lock() == CallState::Failed {
            return;
        }
        self.deliver(event);
    }

    fn deliver(&self, event: TelemetryEvent) {
        let kind = event.kind;
        trace!(milestone = %kind, "call milestone");
        let Some(sink) = &self.sink else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
            warn!(milestone = %kind, "telemetry observer panicked");
        }
    }

    fn succeed(&self) {
        {
            let mut state = self.state.lock();
            if *state != CallState::Pending {
                return;
            }
            *state = CallState::Succeeded;
        }
        self.deliver(TelemetryEvent::new(EventType::ResponseStreamReceived));
    }

    /// Settle as failed, reporting `err` once.
    fn fail(&self, err: HttpError) -> HttpError {
        let first = {
            let mut state = self.state.lock();
            let first = *state == CallState::Pending;
            if first {
                *state = CallState::Failed;
            }
            first
        };
        if first {
            self.deliver(TelemetryEvent::new(EventType::RequestError).with_error(err.clone()));
        }
        err
    }

    fn record_body_error(&self, err: io::Error) {
        let mut slot = self.body_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_body_error(&self) -> Option<io::Error> {
        self.body_error.lock().take()
    }
}

// ---------------------------------------------------------------------------
// Outbound body
// ---------------------------------------------------------------------------

/// Request body that reports `RequestStreamEnded` once fully written.
///
/// hyper never polls a body past its last frame when it already reports end
/// of stream, so completion is also detected on drop.
struct ObservedBody {
    inner: OutboundBody,
    observer: Arc<CallObserver>,
    ended: bool,
}

impl ObservedBody {
    fn finish(&mut self) {
        if !self.ended {
            self.ended = true;
            self.observer.emit(TelemetryEvent::new(EventType::RequestStreamEnded));
        }
    }
}

impl Body for ObservedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Err(_))) => this.ended = true,
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        if self.inner.is_end_stream() {
            self.finish();
        }
    }
}
