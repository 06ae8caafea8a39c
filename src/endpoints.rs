use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Base URL of one ledger read API, without a trailing slash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl From<String> for Endpoint {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at least one ledger endpoint is required")]
pub struct NoEndpoints;

/// Ordered list of equivalent endpoints with a wrapping cursor.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    endpoints: Vec<Endpoint>,
    current: usize,
}

impl EndpointSelector {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, NoEndpoints> {
        if endpoints.is_empty() {
            return Err(NoEndpoints);
        }
        Ok(Self {
            endpoints,
            current: 0,
        })
    }

    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.current]
    }

    pub fn rotate(&mut self) -> &Endpoint {
        self.current = (self.current + 1) % self.endpoints.len();
        tracing::debug!(endpoint = %self.current(), "rotated ledger endpoint");
        self.current()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn index(&self) -> usize {
        self.current
    }
}
