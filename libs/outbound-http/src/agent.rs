//! Persistent connection agent.
//!
//! The agent owns the idle HTTP/1.1 connections of every client that shares
//! it. A call checks a connection out, sends exactly one request on it and,
//! once the response body has been fully read, hands it back. Connections
//! whose response was abandoned or failed are dropped, which closes the
//! socket.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::client::conn::http1;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tower::ServiceExt;
use tracing::{debug, trace};
use url::Url;

use crate::config::{Protocol, humantime_duration};
use crate::error::HttpError;

/// Boxed error type for body stream errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type OutboundBody = UnsyncBoxBody<Bytes, BoxError>;

trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Pooling behaviour of an [`Agent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Keep connections open between calls.
    pub keep_alive: bool,
    /// Upper bound of idle connections kept per origin.
    pub max_idle_per_host: usize,
    /// Idle connections older than this are discarded on checkout.
    #[serde(with = "humantime_duration")]
    pub idle_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_idle_per_host: 64,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// One fresh socket per call, closed once the response is read.
    #[must_use]
    pub fn no_keep_alive() -> Self {
        Self {
            keep_alive: false,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    protocol: Protocol,
    host: String,
    port: u16,
}

impl PoolKey {
    pub(crate) fn from_url(url: &Url) -> Result<Self, HttpError> {
        let protocol = Protocol::from_scheme(url.scheme())?;
        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_owned(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => {
                return Err(HttpError::invalid_argument(format!(
                    "url has no host: {url}"
                )));
            }
        };
        let port = url.port().unwrap_or_else(|| protocol.default_port());
        Ok(Self {
            protocol,
            host,
            port,
        })
    }
}

impl PoolKey {
    /// Authority-only URI handed to the connector.
    fn dial_uri(&self) -> Result<http::Uri, HttpError> {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{host}:{}", self.protocol.scheme(), self.port)
            .parse()
            .map_err(|e| HttpError::invalid_argument(format!("invalid origin {self}: {e}")))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

struct Idle {
    sender: http1::SendRequest<OutboundBody>,
    idle_since: Instant,
}

struct AgentInner {
    config: AgentConfig,
    dialer: HttpConnector,
    idle: Mutex<HashMap<PoolKey, Vec<Idle>>>,
    #[cfg(feature = "tls")]
    tls: std::sync::OnceLock<tokio_rustls::TlsConnector>,
}

/// Connection pool shared by every call issued through it.
///
/// Cloning an agent is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.inner.config)
            .field("idle", &self.idle_connections())
            .finish()
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl Agent {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let mut dialer = HttpConnector::new();
        dialer.set_nodelay(true);
        // TLS is layered on top for https origins.
        dialer.enforce_http(false);
        Self {
            inner: Arc::new(AgentInner {
                config,
                dialer,
                idle: Mutex::new(HashMap::new()),
                #[cfg(feature = "tls")]
                tls: std::sync::OnceLock::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Number of idle connections still open, across all origins.
    ///
    /// Connections the peer has closed are not counted; they are evicted on
    /// the next checkout for their origin.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.inner
            .idle
            .lock()
            .values()
            .flatten()
            .filter(|entry| !entry.sender.is_closed())
            .count()
    }

    /// Pop a reusable idle connection for `key`, discarding stale ones.
    pub(crate) fn take_idle(&self, key: &PoolKey) -> Option<PooledConnection> {
        if !self.inner.config.keep_alive {
            return None;
        }

        let mut idle = self.inner.idle.lock();
        let entries = idle.get_mut(key)?;
        let mut found = None;
        while let Some(entry) = entries.pop() {
            if entry.sender.is_closed()
                || !entry.sender.is_ready()
                || entry.idle_since.elapsed() > self.inner.config.idle_timeout
            {
                trace!(origin = %key, "discarding stale idle connection");
                continue;
            }
            found = Some(entry.sender);
            break;
        }
        if entries.is_empty() {
            idle.remove(key);
        }
        drop(idle);

        found.map(|sender| {
            debug!(origin = %key, "reusing pooled connection");
            PooledConnection {
                agent: self.clone(),
                key: key.clone(),
                sender,
            }
        })
    }

    /// Open a fresh connection: resolve, connect, optional TLS, HTTP/1 handshake.
    pub(crate) async fn connect(&self, key: &PoolKey) -> Result<PooledConnection, HttpError> {
        let tcp = self
            .inner
            .dialer
            .clone()
            .oneshot(key.dial_uri()?)
            .await
            .map_err(|e| HttpError::connect_failed(&key.host, e))?
            .into_inner();

        let io: Box<dyn Io> = match key.protocol {
            Protocol::Http => Box::new(tcp),
            Protocol::Https => self.tls_handshake(&key.host, tcp).await?,
        };

        let (sender, connection) = http1::handshake(TokioIo::new(io)).await?;
        let origin = key.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(origin = %origin, error = %err, "connection closed with error");
            }
        });
        debug!(origin = %key, "connection established");

        Ok(PooledConnection {
            agent: self.clone(),
            key: key.clone(),
            sender,
        })
    }

    #[cfg(feature = "tls")]
    async fn tls_handshake(&self, host: &str, tcp: TcpStream) -> Result<Box<dyn Io>, HttpError> {
        let server_name = rustls_pki_types::ServerName::try_from(host.to_owned())
            .map_err(|e| HttpError::invalid_argument(format!("invalid server name '{host}': {e}")))?;
        let connector = match self.inner.tls.get() {
            Some(connector) => connector.clone(),
            None => {
                let connector = native_tls_connector()?;
                // Concurrent first handshakes: the first connector stored wins.
                let _ = self.inner.tls.set(connector.clone());
                connector
            }
        };
        let stream = connector.connect(server_name, tcp).await?;
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    #[allow(clippy::unused_async)]
    async fn tls_handshake(&self, _host: &str, _tcp: TcpStream) -> Result<Box<dyn Io>, HttpError> {
        Err(HttpError::configuration(
            "https support requires the `tls` feature",
        ))
    }

    fn put_idle(&self, key: PoolKey, sender: http1::SendRequest<OutboundBody>) {
        let mut idle = self.inner.idle.lock();
        let entries = idle.entry(key).or_default();
        if entries.len() < self.inner.config.max_idle_per_host {
            entries.push(Idle {
                sender,
                idle_since: Instant::now(),
            });
        }
    }
}

#[cfg(feature = "tls")]
fn native_tls_connector() -> Result<tokio_rustls::TlsConnector, HttpError> {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "failed to load native root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "loaded native root certificates");

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::configuration(format!("tls setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}

// ---------------------------------------------------------------------------
// Checked-out connection
// ---------------------------------------------------------------------------

/// A connection checked out of an [`Agent`] for a single request.
pub(crate) struct PooledConnection {
    agent: Agent,
    key: PoolKey,
    sender: http1::SendRequest<OutboundBody>,
}

impl PooledConnection {
    pub(crate) async fn send(
        &mut self,
        request: http::Request<OutboundBody>,
    ) -> Result<http::Response<hyper::body::Incoming>, hyper::Error> {
        self.sender.ready().await?;
        self.sender.send_request(request).await
    }

    /// Return the connection to its agent once it can take another request.
    pub(crate) fn release(self) {
        let PooledConnection {
            agent,
            key,
            mut sender,
        } = self;
        if !agent.inner.config.keep_alive || sender.is_closed() {
            return;
        }
        if sender.is_ready() {
            trace!(origin = %key, "connection released");
            agent.put_idle(key, sender);
            return;
        }
        // The dispatcher may still be finishing the previous exchange.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            if sender.ready().await.is_ok() {
                trace!(origin = %key, "connection released");
                agent.put_idle(key, sender);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_uses_default_ports() {
        let key = PoolKey::from_url(&Url::parse("http://example.com/a").unwrap()).unwrap();
        assert_eq!(key.port, 80);
        assert_eq!(key.to_string(), "http://example.com:80");

        let key = PoolKey::from_url(&Url::parse("https://[::1]:8443/").unwrap()).unwrap();
        assert_eq!(key.host, "::1");
        assert_eq!(key.port, 8443);
        assert_eq!(key.protocol, Protocol::Https);
    }

    #[test]
    fn dial_uri_brackets_ipv6_hosts() {
        let key = PoolKey::from_url(&Url::parse("https://[::1]:8443/x").unwrap()).unwrap();
        let uri = key.dial_uri().unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.host(), Some("[::1]"));
        assert_eq!(uri.port_u16(), Some(8443));

        let key = PoolKey::from_url(&Url::parse("http://example.com/a?b").unwrap()).unwrap();
        assert_eq!(key.dial_uri().unwrap().authority().unwrap().as_str(), "example.com:80");
    }

    #[test]
    fn pool_key_rejects_unsupported_schemes() {
        let err = PoolKey::from_url(&Url::parse("ftp://example.com/").unwrap()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn agent_config_deserializes_humantime() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "keep_alive": false,
            "idle_timeout": "1m 30s"
        }))
        .unwrap();
        assert!(!config.keep_alive);
        assert_eq!(config.max_idle_per_host, 64);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn new_agent_has_no_idle_connections() {
        let agent = Agent::default();
        assert!(agent.config().keep_alive);
        assert_eq!(agent.idle_connections(), 0);
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let agent = Agent::default();
        let key = PoolKey::from_url(&Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap()).unwrap();
        let err = agent.connect(&key).await.err().unwrap();

        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert_eq!(err.code(), Some("ECONNREFUSED"));
    }

    #[tokio::test]
    async fn unresolvable_host_is_enotfound() {
        let agent = Agent::default();
        let key = PoolKey::from_url(&Url::parse("http://non-existent-host.invalid/").unwrap()).unwrap();
        let err = agent.connect(&key).await.err().unwrap();

        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert_eq!(err.code(), Some("ENOTFOUND"));
        assert_eq!(err.to_string(), "getaddrinfo ENOTFOUND non-existent-host.invalid");
    }
}
