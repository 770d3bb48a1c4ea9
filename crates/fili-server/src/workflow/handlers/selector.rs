use crate::context::{ClientKind, RequestContext};
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, HandlerChain, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery, QueryContext};
use fili_druid::{DruidResponse, DruidServiceConfig};
use serde_json::Value;
use std::sync::Arc;

/// Ends the outer chain by continuing with the UI or non-UI backend chain.
/// A query whose intervals are all zero-length covers no time and is answered
/// with an empty result instead of being sent to Druid.
pub struct WebServiceSelectorHandler {
    ui: HandlerChain,
    ui_config: DruidServiceConfig,
    non_ui: HandlerChain,
    non_ui_config: DruidServiceConfig,
}

impl WebServiceSelectorHandler {
    pub fn new(
        ui: HandlerChain,
        ui_config: DruidServiceConfig,
        non_ui: HandlerChain,
        non_ui_config: DruidServiceConfig,
    ) -> Self {
        Self {
            ui,
            ui_config,
            non_ui,
            non_ui_config,
        }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for WebServiceSelectorHandler {
    fn stage(&self) -> Stage {
        Stage::WebServiceSelector
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        _next: Next,
    ) -> Result<bool, RequestError> {
        if query.intervals.is_empty() {
            tracing::debug!(request_id = %context.request_id, "no time requested, skipping druid");
            response.process(&query, Ok(DruidResponse::new(Value::Array(Vec::new()))));
            return Ok(true);
        }
        let (chain, service) = match context.client_kind() {
            ClientKind::Ui => (&self.ui, &self.ui_config),
            ClientKind::NonUi => (&self.non_ui, &self.non_ui_config),
        };
        tracing::debug!(request_id = %context.request_id, service = %service.name, "selected backend");
        let query = query.with_context(QueryContext {
            priority: service.priority,
            timeout: Some(service.timeout_ms),
            ..query.context.clone()
        });
        chain.start().run(context, request, query, response).await
    }
}
