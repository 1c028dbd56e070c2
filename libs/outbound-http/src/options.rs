use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::agent::Agent;
use crate::error::HttpError;

/// Request options shared by a client (base) or supplied per call.
///
/// Merging follows one rule set, see [`RequestOptions::merge`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Header map. Names are case-insensitive and stored lower-cased.
    pub headers: HeaderMap,
    /// Connection agent used for the call. `None` defers to the base options.
    pub agent: Option<Agent>,
    /// Free-form attributes for interceptors and telemetry observers.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, replacing any earlier value for the same name.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidArgument`] when the name or value is not a
    /// valid HTTP header token.
    pub fn header<K, V>(mut self, key: K, value: V) -> Result<Self, HttpError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Display,
        V::Error: std::fmt::Display,
    {
        let key = key
            .try_into()
            .map_err(|e| HttpError::invalid_argument(format!("invalid header name: {e}")))?;
        let value = value
            .try_into()
            .map_err(|e| HttpError::invalid_argument(format!("invalid header value: {e}")))?;
        self.headers.insert(key, value);
        Ok(self)
    }

    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Overlay `overrides` on top of `self`.
    ///
    /// - Headers merge per name: every name present in `overrides` replaces all
    ///   of the base values for that name, other base headers are kept.
    /// - `agent` and each attribute key are last-writer-wins.
    #[must_use]
    pub fn merge(&self, overrides: &RequestOptions) -> RequestOptions {
        let mut headers = self.headers.clone();
        for name in overrides.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &overrides.headers {
            headers.append(name.clone(), value.clone());
        }

        let mut attributes = self.attributes.clone();
        attributes.extend(
            overrides
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        RequestOptions {
            headers,
            agent: overrides.agent.clone().or_else(|| self.agent.clone()),
            attributes,
        }
    }
}
