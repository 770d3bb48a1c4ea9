//! # Request & Response Context
//!
//! [`RequestContext`] is what the workflow knows about the caller. It is
//! owned by one request and read-only once built. [`ResponseContext`] is the
//! per-request metadata bag that handler stages annotate and the registered
//! result-set mappers read when the Druid response materializes.

use crate::mappers::ResultSetMapper;
use fili_core::SimplifiedIntervalList;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const CLIENT_ID_HEADER: &str = "clientid";
pub const DEBUG_HEADER: &str = "x-fili-debug";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const USER_HEADER: &str = "x-fili-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Ui,
    NonUi,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    headers: HashMap<String, String>,
    pub user: Option<String>,
    pub started: Instant,
}

impl RequestContext {
    /// Header names are matched case-insensitively.
    pub fn new<I, K, V>(request_id: impl Into<String>, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers: HashMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        let user = headers.get(USER_HEADER).cloned();
        Self {
            request_id: request_id.into(),
            headers,
            user,
            started: Instant::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn client_kind(&self) -> ClientKind {
        match self.header(CLIENT_ID_HEADER) {
            Some(id) if id == "UI" => ClientKind::Ui,
            _ => ClientKind::NonUi,
        }
    }

    pub fn is_debug(&self) -> bool {
        self.header(DEBUG_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// False when the caller asked to bypass cached responses.
    pub fn read_cache(&self) -> bool {
        !self
            .header("cache-control")
            .map(|v| v.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false)
    }
}

// =============================================================================
// Response metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMetadata {
    pub page: usize,
    pub per_page: usize,
    pub total_rows: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub druid_queries: Vec<serde_json::Value>,
    pub druid_responses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "SimplifiedIntervalList::is_empty")]
    pub missing_intervals: SimplifiedIntervalList,
    #[serde(skip_serializing_if = "SimplifiedIntervalList::is_empty")]
    pub volatile_intervals: SimplifiedIntervalList,
    #[serde(skip_serializing_if = "SimplifiedIntervalList::is_empty")]
    pub uncovered_intervals: SimplifiedIntervalList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_count: Option<usize>,
}

/// Shared between every stage and processor of one request.
#[derive(Default)]
pub struct ResponseContext {
    metadata: Mutex<ResponseMetadata>,
    mappers: Mutex<Vec<Arc<dyn ResultSetMapper>>>,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ResponseMetadata) -> R) -> R {
        f(&mut self.metadata.lock())
    }

    pub fn metadata(&self) -> ResponseMetadata {
        self.metadata.lock().clone()
    }

    pub fn replace_metadata(&self, metadata: ResponseMetadata) {
        *self.metadata.lock() = metadata;
    }

    /// Mappers run in registration order.
    pub fn register_mapper(&self, mapper: Arc<dyn ResultSetMapper>) {
        self.mappers.lock().push(mapper);
    }

    pub fn mappers(&self) -> Vec<Arc<dyn ResultSetMapper>> {
        self.mappers.lock().clone()
    }
}
