use crate::context::RequestContext;
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use fili_druid::DruidWebService;
use std::sync::Arc;

/// Terminal stage: posts the query on a spawned task and returns at once.
/// The outcome reaches the response processor from that task.
pub struct AsyncWebServiceHandler {
    service: Arc<dyn DruidWebService>,
}

impl AsyncWebServiceHandler {
    pub fn new(service: Arc<dyn DruidWebService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for AsyncWebServiceHandler {
    fn stage(&self) -> Stage {
        Stage::AsyncWebService
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        _request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        _next: Next,
    ) -> Result<bool, RequestError> {
        let service = self.service.clone();
        let request_id = context.request_id.clone();
        tokio::spawn(async move {
            let outcome = service.post_query(&query).await;
            let result = RequestError::from_outcome(outcome);
            if let Err(e) = &result {
                tracing::warn!(
                    request_id = %request_id,
                    service = %service.config().name,
                    kind = e.kind(),
                    "druid call failed: {}",
                    e
                );
            }
            response.process(&query, result);
        });
        Ok(true)
    }
}
