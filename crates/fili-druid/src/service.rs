//! # Druid Web Service
//!
//! The boundary between the workflow and a Druid broker or coordinator.
//! Every call resolves to exactly one [`WebServiceOutcome`].

use fili_core::DruidQuery;
use serde::{Deserialize, Serialize};

/// Endpoint settings for one Druid service (UI broker, non-UI broker,
/// coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DruidServiceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl DruidServiceConfig {
    pub fn new(name: &str, url: &str, timeout_ms: u64, priority: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            timeout_ms,
            priority,
        }
    }
}

fn default_name() -> String {
    "druid".into()
}

fn default_timeout_ms() -> u64 {
    600_000
}

/// A successful Druid reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DruidResponse {
    pub body: serde_json::Value,
    /// Parsed `X-Druid-Response-Context` header, when Druid sent one.
    pub response_context: Option<serde_json::Value>,
    pub etag: Option<String>,
}

impl DruidResponse {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            response_context: None,
            etag: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("druid did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("druid connection failed: {0}")]
    Connection(String),

    #[error("druid response could not be decoded: {0}")]
    Decode(String),
}

/// Three-way result of a Druid call.
#[derive(Debug, Clone, PartialEq)]
pub enum WebServiceOutcome {
    Success(DruidResponse),
    HttpError {
        status: u16,
        reason: String,
        body: String,
    },
    Failure(TransportFailure),
}

impl WebServiceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[async_trait::async_trait]
pub trait DruidWebService: Send + Sync {
    fn config(&self) -> &DruidServiceConfig;

    /// POST a query document to the configured endpoint.
    async fn post_query(&self, query: &DruidQuery) -> WebServiceOutcome;

    /// GET a JSON document relative to the configured endpoint.
    async fn get_json(&self, path: &str) -> WebServiceOutcome;
}
