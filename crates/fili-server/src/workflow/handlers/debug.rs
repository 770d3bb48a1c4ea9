use crate::context::{RequestContext, ResponseContext};
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use fili_druid::DruidResponse;
use std::sync::Arc;

/// With `x-fili-debug: true`, records the Druid query and the raw Druid
/// response body in the response metadata.
pub struct DebugHandler;

#[async_trait::async_trait]
impl DataRequestHandler for DebugHandler {
    fn stage(&self) -> Stage {
        Stage::Debug
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if !context.is_debug() {
            return next.run(context, request, query, response).await;
        }
        let rendered = serde_json::to_value(&query).unwrap_or_default();
        response
            .response_context()
            .update(|m| m.debug.get_or_insert_with(Default::default).druid_queries.push(rendered));
        let recorder = Arc::new(DebugResponseProcessor { next: response });
        next.run(context, request, query, recorder).await
    }
}

struct DebugResponseProcessor {
    next: Arc<dyn ResponseProcessor>,
}

impl ResponseProcessor for DebugResponseProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    fn process(&self, query: &DruidQuery, outcome: Result<DruidResponse, RequestError>) {
        if let Ok(response) = &outcome {
            let body = response.body.clone();
            self.response_context()
                .update(|m| m.debug.get_or_insert_with(Default::default).druid_responses.push(body));
        }
        self.next.process(query, outcome);
    }
}
