//! # Response Processor
//!
//! Every outcome of the workflow, successful or not, synchronous or from a
//! spawned Druid call, ends up in exactly one [`ResponseProcessor::process`]
//! call on the root [`ResultSetResponseProcessor`]. The root is a two-state
//! machine (Pending → Written) flipped with a compare-and-set, so a second
//! write is dropped no matter which stage or task attempts it.
//!
//! Stages that need to see the response on its way out (cache writer,
//! uncovered-interval check, split collector, debug recorder) wrap the
//! processor they were given and forward to it.

use crate::context::{ResponseContext, ResponseMetadata};
use crate::error::RequestError;
use fili_core::{DruidQuery, ResultSet};
use fili_druid::{parse_result_set, DruidResponse};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

pub trait ResponseProcessor: Send + Sync {
    fn response_context(&self) -> &Arc<ResponseContext>;

    fn process(&self, query: &DruidQuery, outcome: Result<DruidResponse, RequestError>);
}

#[derive(Debug, Clone)]
pub struct DataResponse {
    pub result: ResultSet,
    pub metadata: ResponseMetadata,
    pub druid_query: DruidQuery,
}

#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub error: RequestError,
    /// Absent for failures raised before a query was built.
    pub druid_query: Option<DruidQuery>,
    pub metadata: ResponseMetadata,
}

pub type ProcessorOutput = Result<DataResponse, FailedResponse>;

const PENDING: u8 = 0;
const WRITTEN: u8 = 1;

pub struct ResultSetResponseProcessor {
    context: Arc<ResponseContext>,
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<ProcessorOutput>>>,
}

impl ResultSetResponseProcessor {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<ProcessorOutput>) {
        let (tx, rx) = oneshot::channel();
        let processor = Arc::new(Self {
            context: Arc::new(ResponseContext::new()),
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(tx)),
        });
        (processor, rx)
    }

    pub fn is_written(&self) -> bool {
        self.state.load(Ordering::Acquire) == WRITTEN
    }

    /// Failure raised before any Druid query existed.
    pub fn fail(&self, error: RequestError) {
        self.write(Err(FailedResponse {
            error,
            druid_query: None,
            metadata: self.context.metadata(),
        }));
    }

    fn write(&self, output: ProcessorOutput) {
        if self
            .state
            .compare_exchange(PENDING, WRITTEN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(
                "response already written, dropping {}",
                match &output {
                    Ok(_) => "success".to_string(),
                    Err(f) => f.error.kind().to_string(),
                }
            );
            return;
        }
        if let Some(tx) = self.sender.lock().take() {
            // The receiver is gone once the endpoint gave up waiting.
            if tx.send(output).is_err() {
                tracing::debug!("response receiver dropped before the write");
            }
        }
    }

    fn build(&self, query: &DruidQuery, response: &DruidResponse) -> Result<DataResponse, RequestError> {
        let mut result = parse_result_set(query, &response.body)
            .map_err(|e| RequestError::ResponseParse(e.to_string()))?;
        let mut metadata = self.context.metadata();
        for mapper in self.context.mappers() {
            tracing::trace!(mapper = mapper.name(), rows = result.len(), "applying mapper");
            result = mapper.map(result, &mut metadata)?;
        }
        self.context.replace_metadata(metadata.clone());
        Ok(DataResponse {
            result,
            metadata,
            druid_query: query.clone(),
        })
    }
}

impl ResponseProcessor for ResultSetResponseProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        &self.context
    }

    fn process(&self, query: &DruidQuery, outcome: Result<DruidResponse, RequestError>) {
        if self.is_written() {
            tracing::debug!("response already written, ignoring late outcome");
            return;
        }
        let output = outcome
            .and_then(|response| self.build(query, &response))
            .map_err(|error| FailedResponse {
                error,
                druid_query: Some(query.clone()),
                metadata: self.context.metadata(),
            });
        self.write(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::DateTimeSortMapper;
    use crate::testing::wiki_query;
    use fili_core::SortDirection;
    use serde_json::json;

    fn body() -> serde_json::Value {
        json!([
            {"timestamp": "2015-09-12T00:00:00.000Z", "event": {"page": "A", "added": 1}},
            {"timestamp": "2015-09-13T00:00:00.000Z", "event": {"page": "B", "added": 2}}
        ])
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let (processor, rx) = ResultSetResponseProcessor::new();
        let query = wiki_query();
        processor.process(&query, Ok(DruidResponse::new(body())));
        processor.process(&query, Err(RequestError::Internal("late".into())));
        processor.fail(RequestError::Internal("later".into()));
        assert!(processor.is_written());
        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.result.len(), 2);
    }

    #[tokio::test]
    async fn test_error_first_then_success_is_dropped() {
        let (processor, rx) = ResultSetResponseProcessor::new();
        let query = wiki_query();
        processor.process(&query, Err(RequestError::Timeout("slow".into())));
        processor.process(&query, Ok(DruidResponse::new(body())));
        let failed = rx.await.unwrap().unwrap_err();
        assert_eq!(failed.error.kind(), "timeout");
        assert_eq!(failed.druid_query, Some(query));
    }

    #[tokio::test]
    async fn test_mappers_run_in_registration_order() {
        let (processor, rx) = ResultSetResponseProcessor::new();
        processor
            .response_context()
            .register_mapper(Arc::new(DateTimeSortMapper::new(SortDirection::Descending)));
        processor.process(&wiki_query(), Ok(DruidResponse::new(body())));
        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.result.rows[0].dimensions["page"], "B");
    }

    #[tokio::test]
    async fn test_unparseable_body_is_a_parse_error() {
        let (processor, rx) = ResultSetResponseProcessor::new();
        processor.process(&wiki_query(), Ok(DruidResponse::new(json!({"oops": 1}))));
        let failed = rx.await.unwrap().unwrap_err();
        assert_eq!(failed.error.kind(), "response_parse");
    }
}
