use crate::context::RequestContext;
use crate::error::RequestError;
use crate::mappers::DateTimeSortMapper;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use std::sync::Arc;

/// Druid cannot order by timestamp inside a limit spec, so the sort runs
/// locally on the materialized rows.
pub struct DateTimeSortHandler;

#[async_trait::async_trait]
impl DataRequestHandler for DateTimeSortHandler {
    fn stage(&self) -> Stage {
        Stage::DateTimeSort
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if let Some(direction) = request.date_time_sort {
            response
                .response_context()
                .register_mapper(Arc::new(DateTimeSortMapper::new(direction)));
        }
        next.run(context, request, query, response).await
    }
}
