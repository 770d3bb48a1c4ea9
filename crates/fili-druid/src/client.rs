//! # HTTP Druid Client
//!
//! reqwest-backed [`DruidWebService`]. The request timeout is the endpoint's
//! configured timeout, so UI and non-UI services time out independently.

use crate::service::{
    DruidResponse, DruidServiceConfig, DruidWebService, TransportFailure, WebServiceOutcome,
};
use fili_core::DruidQuery;
use std::time::Duration;

pub const RESPONSE_CONTEXT_HEADER: &str = "X-Druid-Response-Context";

pub struct HttpDruidWebService {
    config: DruidServiceConfig,
    client: reqwest::Client,
}

impl HttpDruidWebService {
    pub fn new(config: DruidServiceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read(&self, result: Result<reqwest::Response, reqwest::Error>) -> WebServiceOutcome {
        let response = match result {
            Ok(r) => r,
            Err(e) => return WebServiceOutcome::Failure(self.classify(&e)),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return WebServiceOutcome::Failure(self.classify(&e)),
        };

        if !status.is_success() {
            return WebServiceOutcome::HttpError {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body: text,
            };
        }

        let body = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(b) => b,
            Err(e) => return WebServiceOutcome::Failure(TransportFailure::Decode(e.to_string())),
        };
        let response_context = headers
            .get(RESPONSE_CONTEXT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| serde_json::from_str(v).ok());
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        WebServiceOutcome::Success(DruidResponse {
            body,
            response_context,
            etag,
        })
    }

    fn classify(&self, error: &reqwest::Error) -> TransportFailure {
        if error.is_timeout() {
            TransportFailure::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else if error.is_decode() {
            TransportFailure::Decode(error.to_string())
        } else {
            TransportFailure::Connection(error.to_string())
        }
    }
}

#[async_trait::async_trait]
impl DruidWebService for HttpDruidWebService {
    fn config(&self) -> &DruidServiceConfig {
        &self.config
    }

    async fn post_query(&self, query: &DruidQuery) -> WebServiceOutcome {
        tracing::debug!(
            service = %self.config.name,
            query_id = ?query.context.query_id,
            "posting {:?} query to {}",
            query.query_type,
            self.config.url
        );
        let result = self.client.post(&self.config.url).json(query).send().await;
        self.read(result).await
    }

    async fn get_json(&self, path: &str) -> WebServiceOutcome {
        let url = self.endpoint(path);
        tracing::debug!(service = %self.config.name, "GET {}", url);
        let result = self.client.get(&url).send().await;
        self.read(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let service = HttpDruidWebService::new(DruidServiceConfig::new(
            "coordinator",
            "http://localhost:8081/druid/coordinator/v1/",
            1000,
            None,
        ))
        .unwrap();
        assert_eq!(
            service.endpoint("/datasources/wiki?full"),
            "http://localhost:8081/druid/coordinator/v1/datasources/wiki?full"
        );
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_a_transport_failure() {
        // Port 9 (discard) on localhost is closed on CI machines.
        let service = HttpDruidWebService::new(DruidServiceConfig::new(
            "broker",
            "http://127.0.0.1:9/druid/v2",
            2000,
            None,
        ))
        .unwrap();
        let outcome = service.get_json("/status").await;
        assert!(matches!(outcome, WebServiceOutcome::Failure(_)));
    }
}
