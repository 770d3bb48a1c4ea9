//! # API Handlers
//!
//! Axum handlers for the data endpoint and its operational siblings.

use crate::availability::TableSummary;
use crate::cache::CacheStats;
use crate::config::CacheMode;
use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::error::{ErrorBody, RequestError};
use crate::format;
use crate::processor::DataResponse;
use crate::workflow::Topology;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fili_core::{DataApiRequest, ResponseFormat};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const DATA_PATH: &str = "/v1/data";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(DATA_PATH, post(post_data))
        .route("/v1/tables", get(list_tables))
        .route("/v1/cache", get(cache_stats).delete(clear_cache))
        .route("/healthcheck", get(healthcheck))
        .with_state(state)
}

// =============================================================================
// Data
// =============================================================================

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn error_response(error: &RequestError, druid_query: Option<serde_json::Value>, request_id: &str) -> Response {
    let status = error.status();
    if status.is_server_error() {
        tracing::warn!(request_id, kind = error.kind(), status = status.as_u16(), "{}", error);
    } else {
        tracing::info!(request_id, kind = error.kind(), status = status.as_u16(), "{}", error);
    }
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, REQUEST_ID_HEADER, request_id);
    (status, headers, Json(ErrorBody::new(error, druid_query, request_id))).into_response()
}

fn data_response(data: &DataResponse, request: &DataApiRequest, request_id: &str) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, REQUEST_ID_HEADER, request_id);
    if let Some(pagination) = &data.metadata.pagination {
        for (name, value) in format::pagination_headers(pagination, DATA_PATH) {
            insert_header(&mut headers, name, &value);
        }
    }
    match request.format {
        ResponseFormat::Json => {
            (StatusCode::OK, headers, Json(format::json_body(data, request))).into_response()
        }
        ResponseFormat::Csv => match format::csv_body(data, request) {
            Ok(body) => {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/csv; charset=utf-8"),
                );
                (StatusCode::OK, headers, body).into_response()
            }
            Err(e) => error_response(&e, None, request_id),
        },
    }
}

pub async fn post_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<DataApiRequest>, JsonRejection>,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request = match body {
        Ok(Json(request)) => Arc::new(request),
        Err(rejection) => {
            return error_response(&RequestError::Malformed(rejection.body_text()), None, &request_id)
        }
    };
    let context = Arc::new(RequestContext::new(
        request_id.clone(),
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string()))),
    ));
    tracing::info!(
        request_id = %request_id,
        table = %request.logical_table,
        client = ?context.client_kind(),
        user = context.user.as_deref().unwrap_or("-"),
        "data request"
    );

    let deadline = Duration::from_millis(state.config.server.response_timeout_ms);
    let outcome = tokio::time::timeout(deadline, async {
        state.workflow.execute(context.clone(), request.clone()).await.await
    })
    .await;

    let response = match outcome {
        Err(_) => error_response(
            &RequestError::Timeout(format!(
                "no response within {}ms",
                state.config.server.response_timeout_ms
            )),
            None,
            &request_id,
        ),
        Ok(Err(_)) => error_response(
            &RequestError::Internal("workflow finished without a response".into()),
            None,
            &request_id,
        ),
        Ok(Ok(Ok(data))) => data_response(&data, &request, &request_id),
        Ok(Ok(Err(failed))) => {
            let druid_query = failed
                .druid_query
                .as_ref()
                .filter(|_| context.is_debug())
                .and_then(|q| serde_json::to_value(q).ok());
            error_response(&failed.error, druid_query, &request_id)
        }
    };
    tracing::debug!(
        request_id = %request_id,
        elapsed_ms = context.started.elapsed().as_millis() as u64,
        status = response.status().as_u16(),
        "data request finished"
    );
    response
}

// =============================================================================
// Tables, cache, health
// =============================================================================

pub async fn list_tables(State(state): State<Arc<AppState>>) -> Json<Vec<TableSummary>> {
    Json(state.dictionary.summaries())
}

#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub mode: CacheMode,
    pub stats: CacheStats,
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheReport> {
    Json(CacheReport {
        mode: state.cache_mode,
        stats: state.cache.stats(),
    })
}

#[derive(Debug, Serialize)]
pub struct CacheCleared {
    pub cleared: usize,
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<CacheCleared> {
    let cleared = state.cache.clear();
    tracing::info!(cleared, "response cache cleared");
    Json(CacheCleared { cleared })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub tables: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_metadata_refresh: Option<DateTime<Utc>>,
    pub topology: Topology,
}

/// Unhealthy only while a configured metadata loader has never succeeded.
pub async fn healthcheck(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Health>) {
    let last_refresh = state.loader.as_ref().and_then(|l| l.last_success());
    let healthy = state.loader.is_none() || last_refresh.is_some();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Health {
            status: if healthy { "ok" } else { "starting" },
            uptime_seconds: state.start_time.elapsed().as_secs(),
            tables: state.dictionary.len(),
            last_metadata_refresh: last_refresh,
            topology: state.workflow.topology().clone(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::{PhysicalTable, PhysicalTableDictionary};
    use crate::cache::{ResponseCache, SegmentIntervalsSigningService};
    use crate::config::{Config, TableConfig};
    use crate::context::{CLIENT_ID_HEADER, DEBUG_HEADER};
    use crate::testing::{group_by_body, iv, wiki_request, FakeCall, FakeDruidService};
    use crate::volatility::DefaultingVolatileIntervalsService;
    use crate::workflow::{DruidWorkflow, WorkflowDeps};
    use fili_core::{PaginationParameters, RequestedDimension};
    use fili_druid::{DruidResponse, WebServiceOutcome};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Instant;

    fn druid(call: FakeCall<'_>) -> WebServiceOutcome {
        match call {
            FakeCall::Query(_) => WebServiceOutcome::Success(DruidResponse::new(group_by_body(&[
                ("2015-09-12", "Foo", 7),
                ("2015-09-12", "Bar, Inc", 3),
            ]))),
            FakeCall::Get(_) => WebServiceOutcome::HttpError {
                status: 404,
                reason: "Not Found".into(),
                body: String::new(),
            },
        }
    }

    fn state(config: Config) -> Arc<AppState> {
        let dictionary = Arc::new(PhysicalTableDictionary::new());
        dictionary.insert(
            PhysicalTable::from_config(&TableConfig {
                name: "wiki".into(),
                availability: vec![iv("2015-09-01/2015-09-20")],
                ..Default::default()
            })
            .unwrap(),
        );
        let service = Arc::new(FakeDruidService::new(druid));
        let cache = Arc::new(ResponseCache::new(config.cache.max_entries));
        let deps = WorkflowDeps {
            ui_service: service.clone(),
            non_ui_service: service,
            dictionary: dictionary.clone(),
            volatility: Arc::new(DefaultingVolatileIntervalsService::new(None, HashMap::new())),
            cache: cache.clone(),
            signer: Arc::new(SegmentIntervalsSigningService::new(dictionary.clone())),
        };
        let workflow = DruidWorkflow::build(&config, deps).unwrap();
        Arc::new(AppState {
            cache_mode: config.cache.mode().unwrap(),
            config,
            workflow,
            dictionary,
            cache,
            loader: None,
            start_time: Instant::now(),
        })
    }

    fn request() -> DataApiRequest {
        let mut request = wiki_request();
        request.dimensions = vec![RequestedDimension {
            name: "page".into(),
            physical_name: None,
            cardinality: Some(10),
        }];
        request
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        headers
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_json_data_response() {
        let response = post_data(
            State(state(Config::default())),
            headers(&[(CLIENT_ID_HEADER, "UI"), ("x-request-id", "req-1")]),
            Ok(Json(request())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-1");
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
        assert_eq!(body["rows"][0]["dateTime"], "2015-09-12 00:00:00.000");
    }

    #[tokio::test]
    async fn test_csv_data_response() {
        let mut request = request();
        request.format = ResponseFormat::Csv;
        let response = post_data(
            State(state(Config::default())),
            headers(&[(CLIENT_ID_HEADER, "UI")]),
            Ok(Json(request)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        let body = String::from_utf8(body_of(response).await).unwrap();
        assert!(body.starts_with("dateTime,page,added\r\n"));
        assert!(body.contains("\"Bar, Inc\""));
    }

    #[tokio::test]
    async fn test_paginated_response_headers() {
        let mut request = request();
        request.pagination = Some(PaginationParameters { page: 1, per_page: 1 });
        let response = post_data(
            State(state(Config::default())),
            headers(&[(CLIENT_ID_HEADER, "UI")]),
            Ok(Json(request)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-total-count"], "2");
        let link = response.headers()["link"].to_str().unwrap().to_string();
        assert!(link.contains("rel=\"next\""));
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["meta"]["pagination"]["pages"], 2);
    }

    #[tokio::test]
    async fn test_partial_data_error_body() {
        let mut request = request();
        request.intervals = vec![iv("2015-09-19/2015-09-21")];
        let response = post_data(
            State(state(Config::default())),
            headers(&[(CLIENT_ID_HEADER, "UI"), ("x-request-id", "req-2")]),
            Ok(Json(request)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["reason"], "partial_data");
        assert_eq!(body["requestId"], "req-2");
        assert!(body.get("druidQuery").is_none());
    }

    #[tokio::test]
    async fn test_debug_errors_include_the_druid_query() {
        let mut config = Config::default();
        config.workflow.query_weight_limit = 0;
        let mut request = request();
        request.pagination = Some(PaginationParameters { page: 9, per_page: 1 });
        let response = post_data(
            State(state(config)),
            headers(&[(DEBUG_HEADER, "true")]),
            Ok(Json(request)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["reason"], "page_not_found");
        assert_eq!(body["druidQuery"]["queryType"], "groupBy");
    }

    #[tokio::test]
    async fn test_cache_endpoints() {
        let mut config = Config::default();
        config.cache.ttl_enabled = true;
        let state = state(config);
        post_data(
            State(state.clone()),
            headers(&[(CLIENT_ID_HEADER, "UI")]),
            Ok(Json(request())),
        )
        .await;

        let Json(report) = cache_stats(State(state.clone())).await;
        assert_eq!(report.mode, CacheMode::Ttl);
        assert_eq!(report.stats.entries, 1);

        let Json(cleared) = clear_cache(State(state.clone())).await;
        assert_eq!(cleared.cleared, 1);
        assert_eq!(state.cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_health_without_loader() {
        let (status, Json(health)) = healthcheck(State(state(Config::default()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
        assert_eq!(health.tables, 1);
        assert!(health.last_metadata_refresh.is_none());
    }

    #[tokio::test]
    async fn test_tables_listing() {
        let Json(tables) = list_tables(State(state(Config::default()))).await;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "wiki");
    }

    #[tokio::test]
    async fn test_response_deadline() {
        let mut config = Config::default();
        config.server.response_timeout_ms = 20;
        let dictionary = Arc::new(PhysicalTableDictionary::new());
        dictionary.insert(
            PhysicalTable::from_config(&TableConfig {
                name: "wiki".into(),
                availability: vec![iv("2015-09-01/2015-09-20")],
                ..Default::default()
            })
            .unwrap(),
        );
        let slow = Arc::new(
            FakeDruidService::new(druid).with_delay(|_| Some(Duration::from_millis(500))),
        );
        let cache = Arc::new(ResponseCache::new(16));
        let workflow = DruidWorkflow::build(
            &config,
            WorkflowDeps {
                ui_service: slow.clone(),
                non_ui_service: slow,
                dictionary: dictionary.clone(),
                volatility: Arc::new(DefaultingVolatileIntervalsService::new(None, HashMap::new())),
                cache: cache.clone(),
                signer: Arc::new(SegmentIntervalsSigningService::new(dictionary.clone())),
            },
        )
        .unwrap();
        let state = Arc::new(AppState {
            cache_mode: CacheMode::None,
            config,
            workflow,
            dictionary,
            cache,
            loader: None,
            start_time: Instant::now(),
        });

        let response = post_data(
            State(state),
            headers(&[(CLIENT_ID_HEADER, "UI")]),
            Ok(Json(request())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
