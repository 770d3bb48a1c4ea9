use crate::context::RequestContext;
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::volatility::VolatileIntervalsService;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery, SimplifiedIntervalList};
use std::sync::Arc;

/// Annotates the grain buckets whose data may still change. Never blocks.
pub struct VolatileDataHandler {
    volatility: Arc<dyn VolatileIntervalsService>,
}

impl VolatileDataHandler {
    pub fn new(volatility: Arc<dyn VolatileIntervalsService>) -> Self {
        Self { volatility }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for VolatileDataHandler {
    fn stage(&self) -> Stage {
        Stage::VolatileData
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        let requested = request.interval_list();
        let volatile = request
            .physical_tables
            .iter()
            .fold(SimplifiedIntervalList::new(), |acc, table| {
                acc.union(&self.volatility.volatile_buckets(table, request.granularity, &requested))
            });
        if !volatile.is_empty() {
            tracing::debug!(request_id = %context.request_id, "volatile buckets: {} intervals", volatile.len());
            response
                .response_context()
                .update(|m| m.volatile_intervals = volatile);
        }
        next.run(context, request, query, response).await
    }
}
