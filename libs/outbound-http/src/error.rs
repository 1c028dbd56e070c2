use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Shared, clonable error source.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`HttpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid argument handed to the public API; raised before any I/O.
    TypeKind,
    /// Unsupported or unparsable base URL / target scheme.
    Configuration,
    /// DNS, connect, reset or write failure while the call was in flight.
    Transport,
    /// Connection aborted after the response head was received.
    PrematureClose,
    /// Malformed JSON in a JSON transform.
    Parse,
    /// JSON transform on a zero-length payload.
    EmptyBody,
}

/// Errors produced by the client, the transforms and the agent.
///
/// Cheap to clone so the same value can be reported to telemetry and returned
/// to the caller.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{message}")]
    Transport {
        code: Option<&'static str>,
        message: String,
        #[source]
        source: Option<SharedSource>,
    },

    #[error("premature connection close after the response has been received")]
    PrematureClose {
        #[source]
        source: Option<SharedSource>,
    },

    #[error("request body stream failed: {source}")]
    BodyStream {
        code: Option<&'static str>,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid JSON payload: {0}")]
    Parse(#[source] Arc<serde_json::Error>),

    #[error("cannot convert empty buffer to JSON")]
    EmptyBody,
}

impl HttpError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::TypeKind,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Transport { .. } | Self::BodyStream { .. } => ErrorKind::Transport,
            Self::PrematureClose { .. } => ErrorKind::PrematureClose,
            Self::Parse(_) => ErrorKind::Parse,
            Self::EmptyBody => ErrorKind::EmptyBody,
        }
    }

    /// Transport-specific code such as `ECONNREFUSED`, when one applies.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Transport { code, .. } | Self::BodyStream { code, .. } => *code,
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn lookup_failed<E>(host: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            code: Some("ENOTFOUND"),
            message: format!("getaddrinfo ENOTFOUND {host}"),
            source: Some(Arc::new(err)),
        }
    }

    /// Map a connector failure. Resolver failures read `dns error ...`;
    /// anything else carries the socket error somewhere in its chain.
    pub(crate) fn connect_failed<E>(host: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if err.to_string().starts_with("dns error") {
            return Self::lookup_failed(host, err);
        }
        let (code, message) = match find_io_error(&err) {
            Some(io) => (io_error_code(io.kind()), io.to_string()),
            None => (None, err.to_string()),
        };
        Self::Transport {
            code,
            message,
            source: Some(Arc::new(err)),
        }
    }

    pub(crate) fn body_stream(err: io::Error) -> Self {
        Self::BodyStream {
            code: io_error_code(err.kind()),
            source: Arc::new(err),
        }
    }

    pub(crate) fn premature_close(err: hyper::Error) -> Self {
        Self::PrematureClose {
            source: Some(Arc::new(err)),
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        Self::Transport {
            code: io_error_code(err.kind()),
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        // hyper reports a peer hang-up before the response head as an
        // incomplete message; surface it the way a reset socket reads.
        let code = if err.is_incomplete_message() {
            Some("ECONNRESET")
        } else {
            find_io_error(&err).and_then(|io| io_error_code(io.kind()))
        };
        let message = if err.is_incomplete_message() {
            "socket hang up".to_owned()
        } else {
            err.to_string()
        };
        Self::Transport {
            code,
            message,
            source: Some(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(Arc::new(err))
    }
}

/// Errno-style error code for an I/O error kind.
#[must_use]
pub fn io_error_code(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => Some("ECONNRESET"),
        io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        io::ErrorKind::NotFound => Some("ENOENT"),
        io::ErrorKind::PermissionDenied => Some("EACCES"),
        io::ErrorKind::AddrNotAvailable => Some("EADDRNOTAVAIL"),
        io::ErrorKind::AddrInUse => Some("EADDRINUSE"),
        _ => None,
    }
}

fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut current = err.source();
    while let Some(source) = current {
        if let Some(io) = source.downcast_ref::<io::Error>() {
            return Some(io);
        }
        current = source.source();
    }
    None
}
