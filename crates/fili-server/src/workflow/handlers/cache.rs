use crate::cache::{CachePolicy, CacheSlot};
use crate::context::{CacheStatus, RequestContext, ResponseContext};
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery, SimplifiedIntervalList};
use fili_druid::{parse_uncovered_intervals, DruidResponse};
use std::sync::Arc;

/// Serves live cached responses without running the inner stages, and
/// stores successful inner responses on a miss.
pub struct CacheHandler {
    policy: Arc<CachePolicy>,
}

impl CacheHandler {
    pub fn new(policy: Arc<CachePolicy>) -> Self {
        Self { policy }
    }
}

fn mark(response: &Arc<dyn ResponseProcessor>, status: CacheStatus) {
    response.response_context().update(|m| m.cache = Some(status));
}

/// A hit skips the Druid partial-data stage, so the uncovered intervals Druid
/// reported when the entry was stored are carried over from its context.
fn annotate_uncovered(response: &Arc<dyn ResponseProcessor>, cached: &DruidResponse) {
    let Some(context) = &cached.response_context else {
        return;
    };
    match parse_uncovered_intervals(context) {
        Ok(reported) if !reported.intervals.is_empty() => {
            let uncovered = SimplifiedIntervalList::simplify(reported.intervals);
            response
                .response_context()
                .update(|m| m.uncovered_intervals = m.uncovered_intervals.union(&uncovered));
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("cached response context unreadable: {}", e),
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for CacheHandler {
    fn stage(&self) -> Stage {
        Stage::Cache
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        let Some(slot) = self.policy.slot(&query) else {
            tracing::debug!(request_id = %context.request_id, "query not cacheable");
            mark(&response, CacheStatus::Bypass);
            return next.run(context, request, query, response).await;
        };

        if context.read_cache() {
            if let Some(cached) = self.policy.lookup(&slot) {
                tracing::debug!(request_id = %context.request_id, key = %slot.key, "cache hit");
                mark(&response, CacheStatus::Hit);
                annotate_uncovered(&response, &cached);
                response.process(&query, Ok(cached));
                return Ok(true);
            }
            mark(&response, CacheStatus::Miss);
        } else {
            mark(&response, CacheStatus::Bypass);
        }

        let writer = Arc::new(CacheWriter {
            next: response,
            policy: self.policy.clone(),
            slot,
        });
        next.run(context, request, query, writer).await
    }
}

/// Stores successful responses on their way out. Store failures are logged
/// and never reach the caller.
struct CacheWriter {
    next: Arc<dyn ResponseProcessor>,
    policy: Arc<CachePolicy>,
    slot: CacheSlot,
}

impl ResponseProcessor for CacheWriter {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    fn process(&self, query: &DruidQuery, outcome: Result<DruidResponse, RequestError>) {
        if let Ok(response) = &outcome {
            self.policy.store(&self.slot, response);
        }
        self.next.process(query, outcome);
    }
}
