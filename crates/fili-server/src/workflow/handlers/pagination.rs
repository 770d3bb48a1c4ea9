use crate::context::RequestContext;
use crate::error::RequestError;
use crate::mappers::PaginationMapper;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use std::sync::Arc;

pub struct PaginationHandler;

#[async_trait::async_trait]
impl DataRequestHandler for PaginationHandler {
    fn stage(&self) -> Stage {
        Stage::Pagination
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if let Some(p) = request.pagination {
            response
                .response_context()
                .register_mapper(Arc::new(PaginationMapper::new(p.page, p.per_page)));
        }
        next.run(context, request, query, response).await
    }
}
