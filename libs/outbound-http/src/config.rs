use std::time::Duration;

use http::{HeaderName, HeaderValue};
use url::Url;

use crate::agent::{Agent, AgentConfig};
use crate::error::HttpError;
use crate::header::{ACCEPT, APPLICATION_JSON, CONTENT_TYPE};
use crate::options::RequestOptions;

pub const ENV_BASE_URL: &str = "OUTBOUND_HTTP_BASE_URL";
pub const ENV_KEEP_ALIVE: &str = "OUTBOUND_HTTP_KEEP_ALIVE";
pub const ENV_MAX_IDLE_PER_HOST: &str = "OUTBOUND_HTTP_MAX_IDLE_PER_HOST";
pub const ENV_IDLE_TIMEOUT: &str = "OUTBOUND_HTTP_IDLE_TIMEOUT";

/// Transport protocol a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub(crate) fn from_scheme(scheme: &str) -> Result<Self, HttpError> {
        match scheme {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(HttpError::configuration(format!(
                "unsupported protocol '{other}:'"
            ))),
        }
    }

    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

/// Construction input of an [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relative call targets are resolved against this URL.
    pub base_url: Url,
    /// Options every call starts from.
    pub base_options: RequestOptions,
    /// Agent used when neither the base nor the call options name one.
    pub agent: Option<Agent>,
    /// JSON mode: JSON `accept`/`content-type` base headers.
    pub json: bool,
}

impl ClientConfig {
    /// # Errors
    /// Returns [`HttpError::Configuration`] when `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HttpError::configuration(format!("invalid base url '{base_url}': {e}")))?;
        Ok(Self::from_url(base_url))
    }

    #[must_use]
    pub fn from_url(base_url: Url) -> Self {
        Self {
            base_url,
            base_options: RequestOptions::default(),
            agent: None,
            json: false,
        }
    }

    /// Build from `OUTBOUND_HTTP_*` environment variables.
    ///
    /// `OUTBOUND_HTTP_BASE_URL` is required. The agent settings fall back to
    /// [`AgentConfig::default`] field by field.
    ///
    /// # Errors
    /// Returns [`HttpError::Configuration`] for a missing base URL or a value
    /// that does not parse.
    pub fn from_env() -> Result<Self, HttpError> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| HttpError::configuration(format!("{ENV_BASE_URL} environment variable not set")))?;

        let mut agent = AgentConfig::default();
        if let Some(keep_alive) = env_var(ENV_KEEP_ALIVE) {
            agent.keep_alive = parse_bool(ENV_KEEP_ALIVE, &keep_alive)?;
        }
        if let Some(max_idle) = env_var(ENV_MAX_IDLE_PER_HOST) {
            agent.max_idle_per_host = max_idle.parse().map_err(|e| {
                HttpError::configuration(format!("{ENV_MAX_IDLE_PER_HOST}: {e}"))
            })?;
        }
        if let Some(timeout) = env_var(ENV_IDLE_TIMEOUT) {
            agent.idle_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| HttpError::configuration(format!("{ENV_IDLE_TIMEOUT}: {e}")))?;
        }

        Ok(Self::new(&base_url)?.with_agent(Agent::new(agent)))
    }

    /// Add a base header.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidArgument`] for an invalid name or value.
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Result<Self, HttpError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Display,
        V::Error: std::fmt::Display,
    {
        self.base_options = self.base_options.header(key, value)?;
        Ok(self)
    }

    /// Overlay `options` on the current base options.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.base_options = self.base_options.merge(&options);
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Base options with JSON defaults applied underneath caller headers.
    pub(crate) fn effective_base_options(&self) -> RequestOptions {
        if !self.json {
            return self.base_options.clone();
        }
        let mut json = RequestOptions::default();
        json.headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        json.headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        json.merge(&self.base_options)
    }

    /// Agent resolution: base options, then this config, then a default
    /// keep-alive agent.
    pub(crate) fn resolve_agent(&self) -> Agent {
        self.base_options
            .agent
            .clone()
            .or_else(|| self.agent.clone())
            .unwrap_or_default()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, HttpError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(HttpError::configuration(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

/// `serde(with = ...)` adapter for humantime durations such as `"30s"`.
pub(crate) mod humantime_duration {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
