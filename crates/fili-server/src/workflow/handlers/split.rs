use crate::availability::PhysicalTableDictionary;
use crate::config::SplitPolicy;
use crate::context::{RequestContext, ResponseContext};
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::workflow::{DataRequestHandler, Next, Stage};
use chrono::{DateTime, Utc};
use fili_core::interval::parse_instant;
use fili_core::{DataApiRequest, DruidQuery, Granularity, Interval};
use fili_druid::{parse_uncovered_intervals, DruidResponse};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Cuts a query into interval slices, runs the rest of the chain for every
/// slice concurrently and merges the slice responses back into one.
pub struct QuerySplitHandler {
    policy: SplitPolicy,
    dictionary: Arc<PhysicalTableDictionary>,
}

impl QuerySplitHandler {
    pub fn new(policy: SplitPolicy, dictionary: Arc<PhysicalTableDictionary>) -> Self {
        Self { policy, dictionary }
    }

    /// Grain `all` has a single bucket, and a groupBy limit spec orders and
    /// truncates across every interval at once. Neither survives slicing.
    pub fn is_splittable(query: &DruidQuery) -> bool {
        let limited = query
            .limit_spec
            .as_ref()
            .is_some_and(|spec| spec.limit.is_some() || !spec.columns.is_empty());
        query.granularity != Granularity::All && !limited
    }

    pub fn slices(&self, request: &DataApiRequest, query: &DruidQuery) -> Vec<Interval> {
        let grain = query.granularity;
        let requested = query.interval_list();
        if !Self::is_splittable(query) {
            return requested.into_vec();
        }
        match self.policy {
            SplitPolicy::AvailabilityGaps => {
                let available = self.dictionary.availability_for(request).unwrap_or_default();
                let mut cuts: Vec<DateTime<Utc>> = available
                    .iter()
                    .flat_map(|i| [i.start(), i.end()])
                    .map(|t| grain.round_floor(t))
                    .collect();
                cuts.sort();
                cuts.dedup();
                requested
                    .iter()
                    .flat_map(|interval| cut_at(interval, &cuts))
                    .collect()
            }
            SplitPolicy::FixedBuckets { buckets } => requested
                .iter()
                .flat_map(|interval| {
                    grain
                        .buckets(interval)
                        .chunks(buckets.max(1))
                        .filter_map(|run| {
                            let (first, last) = (run.first()?, run.last()?);
                            Interval::new(first.start(), last.end())
                                .ok()?
                                .intersection(interval)
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }
}

fn cut_at(interval: &Interval, cuts: &[DateTime<Utc>]) -> Vec<Interval> {
    let mut bounds = vec![interval.start()];
    bounds.extend(
        cuts.iter()
            .copied()
            .filter(|c| *c > interval.start() && *c < interval.end()),
    );
    bounds.push(interval.end());
    bounds
        .windows(2)
        .filter_map(|w| Interval::new(w[0], w[1]).ok())
        .collect()
}

#[async_trait::async_trait]
impl DataRequestHandler for QuerySplitHandler {
    fn stage(&self) -> Stage {
        Stage::QuerySplit
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if !Self::is_splittable(&query) {
            return next.run(context, request, query, response).await;
        }
        let slices = self.slices(request, &query);
        if slices.len() <= 1 {
            return next.run(context, request, query, response).await;
        }

        tracing::debug!(request_id = %context.request_id, slices = slices.len(), "splitting query");
        response
            .response_context()
            .update(|m| m.split_count = Some(slices.len()));
        let collector = Arc::new(SplitCollector::new(slices.len(), query.clone(), response));

        for (index, slice) in slices.into_iter().enumerate() {
            let sub_query = query.with_intervals(vec![slice]);
            let slot: Arc<dyn ResponseProcessor> = Arc::new(SliceProcessor {
                index,
                collector: collector.clone(),
            });
            let next = next.clone();
            let context = context.clone();
            let request = request.clone();
            tokio::spawn(async move {
                if let Err(e) = next.run(&context, &request, sub_query.clone(), slot.clone()).await {
                    slot.process(&sub_query, Err(e));
                }
            });
        }
        Ok(true)
    }
}

/// Per-request merge barrier. Each slice fills its own slot; the last one in
/// merges. The first failure is forwarded at once and later outcomes are
/// dropped.
struct SplitCollector {
    remaining: AtomicUsize,
    failed: AtomicBool,
    slots: Mutex<Vec<Option<DruidResponse>>>,
    query: DruidQuery,
    next: Arc<dyn ResponseProcessor>,
}

impl SplitCollector {
    fn new(count: usize, query: DruidQuery, next: Arc<dyn ResponseProcessor>) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            failed: AtomicBool::new(false),
            slots: Mutex::new(vec![None; count]),
            query,
            next,
        }
    }

    fn complete(&self, index: usize, outcome: Result<DruidResponse, RequestError>) {
        match outcome {
            Err(e) => {
                if !self.failed.swap(true, Ordering::AcqRel) {
                    tracing::warn!(slice = index, "split slice failed: {}", e);
                    self.next.process(&self.query, Err(e));
                }
            }
            Ok(response) => {
                if self.failed.load(Ordering::Acquire) {
                    return;
                }
                if let Some(slot) = self.slots.lock().get_mut(index) {
                    *slot = Some(response);
                }
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let responses: Vec<DruidResponse> =
                        self.slots.lock().drain(..).flatten().collect();
                    self.next.process(&self.query, merge_responses(responses));
                }
            }
        }
    }
}

struct SliceProcessor {
    index: usize,
    collector: Arc<SplitCollector>,
}

impl ResponseProcessor for SliceProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.collector.next.response_context()
    }

    fn process(&self, _query: &DruidQuery, outcome: Result<DruidResponse, RequestError>) {
        self.collector.complete(self.index, outcome);
    }
}

fn row_timestamp(row: &Value) -> Option<DateTime<Utc>> {
    row.get("timestamp").and_then(Value::as_str).and_then(parse_instant)
}

/// Concatenates rows in slice order, then stable-sorts on timestamp so the
/// merged order never depends on which slice finished first.
fn merge_responses(responses: Vec<DruidResponse>) -> Result<DruidResponse, RequestError> {
    let mut rows: Vec<Value> = Vec::new();
    let mut uncovered: Vec<Value> = Vec::new();
    let mut overflowed = false;
    let mut any_context = false;

    for response in responses {
        match response.body {
            Value::Array(items) => rows.extend(items),
            _ => return Err(RequestError::ResponseParse("split slice response is not an array".into())),
        }
        if let Some(context) = &response.response_context {
            any_context = true;
            let reported = parse_uncovered_intervals(context)
                .map_err(|e| RequestError::ResponseParse(e.to_string()))?;
            overflowed |= reported.overflowed;
            uncovered.extend(reported.intervals.iter().map(|i| json!(i.to_string())));
        }
    }
    rows.sort_by_key(row_timestamp);

    Ok(DruidResponse {
        body: Value::Array(rows),
        response_context: any_context.then(|| {
            json!({
                "uncoveredIntervals": uncovered,
                "uncoveredIntervalsOverflowed": overflowed,
            })
        }),
        etag: None,
    })
}
