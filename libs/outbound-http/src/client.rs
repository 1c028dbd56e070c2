use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use url::Url;

use crate::agent::Agent;
use crate::body::Consumable;
use crate::call::CallBuilder;
use crate::config::{ClientConfig, Protocol};
use crate::error::HttpError;
use crate::options::RequestOptions;
use crate::response::Response;
use crate::transform::{TransformedResponse, to_json_response};

type TransformFn<T> = Arc<dyn Fn(Response) -> BoxFuture<'static, Result<T, HttpError>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Call target
// ---------------------------------------------------------------------------

/// Where a call goes: a path resolved against the base URL, or an absolute URL
/// used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Path(String),
    Url(Url),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.to_owned())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(path)
    }
}

impl From<&String> for Target {
    fn from(path: &String) -> Self {
        Target::Path(path.clone())
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target::Url(url)
    }
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

/// Request about to be sent, as seen by a [`RequestInterceptor`].
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: Url,
    pub method: Method,
    pub options: RequestOptions,
}

/// Last-chance hook before a request goes on the wire.
///
/// Runs once per call after the options have been merged. Whatever it changes
/// is what gets sent.
#[async_trait::async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn will_send_request(&self, request: &mut OutboundRequest);
}

/// Adapter turning a synchronous closure into a [`RequestInterceptor`].
pub struct InterceptorFn<F>(F);

pub fn interceptor_fn<F>(f: F) -> InterceptorFn<F>
where
    F: Fn(&mut OutboundRequest) + Send + Sync,
{
    InterceptorFn(f)
}

#[async_trait::async_trait]
impl<F> RequestInterceptor for InterceptorFn<F>
where
    F: Fn(&mut OutboundRequest) + Send + Sync,
{
    async fn will_send_request(&self, request: &mut OutboundRequest) {
        (self.0)(request);
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP/1.1 client bound to a base URL.
///
/// `T` is what a call resolves to: the raw [`Response`] by default, or the
/// output of the transform installed with [`HttpClient::with_transform`].
/// Clones share the agent, the interceptor and the transform.
pub struct HttpClient<T = Response> {
    base_url: Url,
    protocol: Option<Protocol>,
    base_options: RequestOptions,
    agent: Agent,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    transform: TransformFn<T>,
}

impl<T> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            protocol: self.protocol,
            base_options: self.base_options.clone(),
            agent: self.agent.clone(),
            interceptor: self.interceptor.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<T> std::fmt::Debug for HttpClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("protocol", &self.protocol)
            .field("base_options", &self.base_options)
            .field("agent", &self.agent)
            .field("interceptor", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient<Response> {
    /// Client accepting both `http` and `https` targets.
    ///
    /// # Errors
    /// Returns [`HttpError::Configuration`] when the base URL scheme is
    /// neither `http` nor `https`.
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        Self::build(config, None)
    }

    /// Plain-HTTP client.
    ///
    /// # Errors
    /// Returns [`HttpError::Configuration`] unless the base URL is `http`.
    pub fn http(config: ClientConfig) -> Result<Self, HttpError> {
        Self::build(config, Some(Protocol::Http))
    }

    /// TLS client.
    ///
    /// # Errors
    /// Returns [`HttpError::Configuration`] unless the base URL is `https`.
    #[cfg(feature = "tls")]
    pub fn https(config: ClientConfig) -> Result<Self, HttpError> {
        Self::build(config, Some(Protocol::Https))
    }

    fn build(config: ClientConfig, protocol: Option<Protocol>) -> Result<Self, HttpError> {
        let scheme = Protocol::from_scheme(config.base_url.scheme())?;
        if let Some(expected) = protocol {
            if scheme != expected {
                return Err(protocol_mismatch(scheme, expected));
            }
        }
        if scheme == Protocol::Https && !cfg!(feature = "tls") {
            return Err(HttpError::configuration(
                "https support requires the `tls` feature",
            ));
        }

        tracing::debug!(base_url = %config.base_url, json = config.json, "http client created");
        Ok(Self {
            base_options: config.effective_base_options(),
            agent: config.resolve_agent(),
            base_url: config.base_url,
            protocol,
            interceptor: None,
            transform: Arc::new(
                |response: Response| -> BoxFuture<'static, Result<Response, HttpError>> {
                    futures::future::ok(response).boxed()
                },
            ),
        })
    }
}

/// Client in JSON mode: JSON base headers and every response parsed with
/// [`to_json_response`].
///
/// # Errors
/// Same as [`HttpClient::new`].
pub fn json_client(
    config: ClientConfig,
) -> Result<HttpClient<TransformedResponse<serde_json::Value>>, HttpError> {
    Ok(HttpClient::new(config.json())?
        .with_transform(|response: Response| to_json_response::<serde_json::Value>(response)))
}

impl<T> HttpClient<T> {
    /// Replace the response transform.
    ///
    /// Transform errors reach the caller unchanged.
    pub fn with_transform<U, F, Fut>(self, transform: F) -> HttpClient<U>
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, HttpError>> + Send + 'static,
    {
        HttpClient {
            base_url: self.base_url,
            protocol: self.protocol,
            base_options: self.base_options,
            agent: self.agent,
            interceptor: self.interceptor,
            transform: Arc::new(move |response: Response| transform(response).boxed()),
        }
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn base_options(&self) -> &RequestOptions {
        &self.base_options
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn get(&self, target: impl Into<Target>) -> CallBuilder<'_, T> {
        self.request(Method::GET, target)
    }

    pub fn delete(&self, target: impl Into<Target>) -> CallBuilder<'_, T> {
        self.request(Method::DELETE, target)
    }

    pub fn post(&self, target: impl Into<Target>, body: impl Into<Consumable>) -> CallBuilder<'_, T> {
        self.request(Method::POST, target).body(body)
    }

    pub fn put(&self, target: impl Into<Target>, body: impl Into<Consumable>) -> CallBuilder<'_, T> {
        self.request(Method::PUT, target).body(body)
    }

    pub fn patch(&self, target: impl Into<Target>, body: impl Into<Consumable>) -> CallBuilder<'_, T> {
        self.request(Method::PATCH, target).body(body)
    }

    /// Call with an arbitrary method and no body.
    pub fn request(&self, method: Method, target: impl Into<Target>) -> CallBuilder<'_, T> {
        CallBuilder::new(self, method, target.into())
    }

    /// Resolve a target against the base URL and check its scheme.
    pub(crate) fn resolve(&self, target: Target) -> Result<Url, HttpError> {
        let url = match target {
            Target::Url(url) => url,
            Target::Path(path) => self.base_url.join(&path).map_err(|e| {
                HttpError::invalid_argument(format!("invalid request target '{path}': {e}"))
            })?,
        };
        self.check_protocol(&url)?;
        Ok(url)
    }

    pub(crate) fn check_protocol(&self, url: &Url) -> Result<(), HttpError> {
        let scheme = Protocol::from_scheme(url.scheme())?;
        match self.protocol {
            Some(expected) if expected != scheme => Err(protocol_mismatch(scheme, expected)),
            _ => Ok(()),
        }
    }

    pub(crate) fn interceptor(&self) -> Option<&dyn RequestInterceptor> {
        self.interceptor.as_deref()
    }

    pub(crate) async fn apply_transform(&self, response: Response) -> Result<T, HttpError> {
        (self.transform)(response).await
    }
}

fn protocol_mismatch(actual: Protocol, expected: Protocol) -> HttpError {
    HttpError::configuration(format!(
        "protocol '{}:' not supported, expected '{}:'",
        actual.scheme(),
        expected.scheme()
    ))
}
