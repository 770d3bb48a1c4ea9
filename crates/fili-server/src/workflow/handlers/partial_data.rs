use crate::availability::{missing_intervals, PhysicalTableDictionary};
use crate::config::PartialDataPolicy;
use crate::context::RequestContext;
use crate::error::RequestError;
use crate::mappers::PartialDataMapper;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use std::sync::Arc;

/// Compares requested grain buckets against physical table availability.
/// Volatile buckets are never counted as missing.
pub struct PartialDataHandler {
    dictionary: Arc<PhysicalTableDictionary>,
    policy: PartialDataPolicy,
}

impl PartialDataHandler {
    pub fn new(dictionary: Arc<PhysicalTableDictionary>, policy: PartialDataPolicy) -> Self {
        Self { dictionary, policy }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for PartialDataHandler {
    fn stage(&self) -> Stage {
        Stage::PartialData
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        let available = self.dictionary.availability_for(request)?;
        let volatile = response.response_context().metadata().volatile_intervals;
        let missing = missing_intervals(&request.interval_list(), &available, request.granularity)
            .subtract(&volatile);

        if !missing.is_empty() {
            match self.policy {
                PartialDataPolicy::Reject => return Err(RequestError::PartialData { missing }),
                PartialDataPolicy::Allow => {
                    tracing::info!(
                        request_id = %context.request_id,
                        "serving partial data, {} missing intervals",
                        missing.len()
                    );
                    let metadata = response.response_context();
                    metadata.register_mapper(Arc::new(PartialDataMapper::new(missing.clone())));
                    metadata.update(|m| m.missing_intervals = missing);
                }
            }
        }
        next.run(context, request, query, response).await
    }
}
