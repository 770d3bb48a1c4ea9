use crate::context::RequestContext;
use crate::error::RequestError;
use crate::mappers::TopNMapper;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery, QueryType};
use std::sync::Arc;

/// TopN requests that were not built as native topN queries get ranked and
/// truncated per time bucket once the rows arrive.
pub struct TopNMapperHandler;

#[async_trait::async_trait]
impl DataRequestHandler for TopNMapperHandler {
    fn stage(&self) -> Stage {
        Stage::TopNMapper
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if let (Some(threshold), Some(sort)) = (request.top_n, request.sorts.first()) {
            if query.query_type != QueryType::TopN {
                response.response_context().register_mapper(Arc::new(TopNMapper::new(
                    threshold,
                    &sort.metric,
                    sort.direction,
                )));
            }
        }
        next.run(context, request, query, response).await
    }
}
