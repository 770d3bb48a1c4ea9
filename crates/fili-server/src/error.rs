//! # Request Errors
//!
//! The single error type flowing through the handler chain and the response
//! processor, and its mapping onto HTTP statuses and the JSON error body.

use axum::http::StatusCode;
use fili_core::{SimplifiedIntervalList, ValidationError};
use fili_druid::{DruidResponse, TransportFailure, WebServiceOutcome};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed request body: {0}")]
    Malformed(String),

    #[error("filter expands to {count} druid clauses, more than the limit of {limit}")]
    TooManyFilters { count: usize, limit: usize },

    #[error("requested data is not available for intervals {}", join(.missing))]
    PartialData { missing: SimplifiedIntervalList },

    #[error("no physical table matched: {0}")]
    NoMatchFound(String),

    #[error("druid reported uncovered intervals {} (overflowed: {overflowed})", join(.uncovered))]
    UncoveredIntervals {
        uncovered: SimplifiedIntervalList,
        overflowed: bool,
    },

    #[error("result set too large: estimated {weight} rows exceeds the limit of {limit}")]
    RowLimitReached { weight: u64, limit: u64 },

    #[error("requested page {page} with {per_page} rows per page, but there are only {pages} pages")]
    PageNotFound {
        page: usize,
        per_page: usize,
        pages: usize,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("druid responded {status} {reason}: {body}")]
    DruidHttp {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("{0}")]
    Transport(String),

    #[error("could not read druid response: {0}")]
    ResponseParse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn join(list: &SimplifiedIntervalList) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl RequestError {
    /// External status code. Several kinds share 500; `kind()` keeps them
    /// apart in the response body.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::Malformed(_)
            | Self::TooManyFilters { .. }
            | Self::PageNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::PartialData { .. }
            | Self::NoMatchFound(_)
            | Self::UncoveredIntervals { .. }
            | Self::Transport(_)
            | Self::ResponseParse(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DruidHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::RowLimitReached { .. } => StatusCode::INSUFFICIENT_STORAGE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Malformed(_) => "malformed_request",
            Self::TooManyFilters { .. } => "too_many_filters",
            Self::PartialData { .. } => "partial_data",
            Self::NoMatchFound(_) => "no_match_found",
            Self::UncoveredIntervals { .. } => "uncovered_intervals",
            Self::RowLimitReached { .. } => "row_limit_reached",
            Self::PageNotFound { .. } => "page_not_found",
            Self::Timeout(_) => "timeout",
            Self::DruidHttp { .. } => "druid_http",
            Self::Transport(_) => "transport",
            Self::ResponseParse(_) => "response_parse",
            Self::Internal(_) => "internal",
        }
    }

    /// Collapse a three-way web service outcome into the processor's input.
    pub fn from_outcome(outcome: WebServiceOutcome) -> Result<DruidResponse, Self> {
        match outcome {
            WebServiceOutcome::Success(response) => Ok(response),
            WebServiceOutcome::HttpError {
                status,
                reason,
                body,
            } => Err(Self::DruidHttp {
                status,
                reason,
                body,
            }),
            WebServiceOutcome::Failure(failure) => Err(failure.into()),
        }
    }
}

impl From<TransportFailure> for RequestError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Timeout { .. } => Self::Timeout(failure.to_string()),
            TransportFailure::Decode(_) => Self::ResponseParse(failure.to_string()),
            TransportFailure::Connection(_) => Self::Transport(failure.to_string()),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: u16,
    pub status_name: String,
    pub reason: &'static str,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub druid_query: Option<serde_json::Value>,
    pub request_id: String,
}

impl ErrorBody {
    pub fn new(error: &RequestError, druid_query: Option<serde_json::Value>, request_id: &str) -> Self {
        let status = error.status();
        Self {
            status: status.as_u16(),
            status_name: status.canonical_reason().unwrap_or("Unknown").to_string(),
            reason: error.kind(),
            description: error.to_string(),
            druid_query,
            request_id: request_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fili_core::Interval;

    #[test]
    fn test_status_mapping_keeps_kinds_distinct() {
        let partial = RequestError::PartialData {
            missing: SimplifiedIntervalList::single(Interval::parse("2015-09-12/2015-09-13").unwrap()),
        };
        let no_match = RequestError::NoMatchFound("wiki".into());
        assert_eq!(partial.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(no_match.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_ne!(partial.kind(), no_match.kind());
        assert!(partial.to_string().contains("2015-09-12T00:00:00.000Z"));
    }

    #[test]
    fn test_row_limit_is_507_and_timeout_is_504() {
        let rows = RequestError::RowLimitReached { weight: 10, limit: 5 };
        assert_eq!(rows.status().as_u16(), 507);
        let timeout: RequestError = TransportFailure::Timeout { timeout_ms: 10 }.into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_druid_http_status_passes_through() {
        let outcome = WebServiceOutcome::HttpError {
            status: 503,
            reason: "Service Unavailable".into(),
            body: "{}".into(),
        };
        let err = RequestError::from_outcome(outcome).unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.kind(), "druid_http");
    }

    #[test]
    fn test_error_body_has_no_debug_rendering() {
        let err = RequestError::TooManyFilters { count: 12, limit: 10 };
        let body = serde_json::to_value(ErrorBody::new(&err, None, "req-1")).unwrap();
        assert_eq!(body["status"], 400);
        assert_eq!(body["reason"], "too_many_filters");
        assert_eq!(body["requestId"], "req-1");
        assert!(body.get("druidQuery").is_none());
    }
}
