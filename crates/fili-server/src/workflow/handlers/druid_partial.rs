use crate::context::{RequestContext, ResponseContext};
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery, QueryContext, SimplifiedIntervalList};
use fili_druid::{parse_uncovered_intervals, DruidResponse};
use std::sync::Arc;

/// Asks Druid to report intervals it had no segments for, and fails the
/// response when Druid is missing data the availability metadata promised.
pub struct DruidPartialDataHandler {
    limit: usize,
}

impl DruidPartialDataHandler {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for DruidPartialDataHandler {
    fn stage(&self) -> Stage {
        Stage::DruidPartialData
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        let query = query.with_context(QueryContext {
            uncovered_intervals_limit: Some(self.limit),
            ..query.context.clone()
        });
        let checker = Arc::new(UncoveredIntervalsProcessor { next: response });
        next.run(context, request, query, checker).await
    }
}

struct UncoveredIntervalsProcessor {
    next: Arc<dyn ResponseProcessor>,
}

impl UncoveredIntervalsProcessor {
    fn check(&self, query: &DruidQuery, response: DruidResponse) -> Result<DruidResponse, RequestError> {
        let reported = match &response.response_context {
            Some(context) => parse_uncovered_intervals(context)
                .map_err(|e| RequestError::ResponseParse(e.to_string()))?,
            None => return Ok(response),
        };
        let uncovered = SimplifiedIntervalList::simplify(reported.intervals);

        // What availability claimed would be there.
        let metadata = self.response_context().metadata();
        let expected = query
            .interval_list()
            .subtract(&metadata.missing_intervals)
            .subtract(&metadata.volatile_intervals);

        if reported.overflowed || !uncovered.intersect(&expected).is_empty() {
            return Err(RequestError::UncoveredIntervals {
                uncovered,
                overflowed: reported.overflowed,
            });
        }
        if !uncovered.is_empty() {
            self.response_context()
                .update(|m| m.uncovered_intervals = m.uncovered_intervals.union(&uncovered));
        }
        Ok(response)
    }
}

impl ResponseProcessor for UncoveredIntervalsProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    fn process(&self, query: &DruidQuery, outcome: Result<DruidResponse, RequestError>) {
        let outcome = outcome.and_then(|response| self.check(query, response));
        self.next.process(query, outcome);
    }
}
