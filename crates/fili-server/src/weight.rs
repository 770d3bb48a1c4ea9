//! # Query Weight
//!
//! Worst-case row estimates and the pre-flight count query used to keep
//! expensive groupBy queries off the non-UI broker.

use crate::error::RequestError;
use fili_core::{Aggregation, DataApiRequest, DataSource, DruidQuery, Granularity, QueryType};
use serde_json::Value;

pub const WEIGHT_COLUMN: &str = "count";

/// Upper bound on result rows: product of dimension cardinalities times the
/// number of grain buckets. `None` when a dimension has no estimate.
pub fn worst_case_rows(request: &DataApiRequest) -> Option<u64> {
    let buckets = request.granularity.bucket_count(request.interval_list().iter());
    request
        .dimensions
        .iter()
        .try_fold(buckets, |acc, d| d.cardinality.map(|c| acc.saturating_mul(c)))
}

/// The pre-flight is only worth running for groupBy queries that could
/// exceed the limit.
pub fn needs_weight_check(request: &DataApiRequest, query: &DruidQuery, limit: u64) -> bool {
    if limit == 0 || query.query_type != QueryType::GroupBy {
        return false;
    }
    match worst_case_rows(request) {
        Some(rows) => rows > limit,
        None => true,
    }
}

/// Outer count over the rows the inner query would return. The inner query
/// keeps the grouping and intervals and drops everything that only shapes
/// values.
pub fn weight_evaluation_query(query: &DruidQuery) -> DruidQuery {
    let mut inner = query.clone();
    inner.aggregations = vec![Aggregation::count("rows")];
    inner.post_aggregations.clear();
    inner.limit_spec = None;

    DruidQuery {
        query_type: QueryType::GroupBy,
        data_source: DataSource::Query {
            query: Box::new(inner),
        },
        granularity: Granularity::All,
        dimensions: Vec::new(),
        dimension: None,
        threshold: None,
        metric: None,
        filter: None,
        aggregations: vec![Aggregation::count(WEIGHT_COLUMN)],
        post_aggregations: Vec::new(),
        limit_spec: None,
        intervals: query.intervals.clone(),
        context: query.context.clone(),
    }
}

/// Row count from a weight query response. An empty response weighs nothing.
pub fn parse_weight(body: &Value) -> Result<u64, RequestError> {
    let rows = body
        .as_array()
        .ok_or_else(|| RequestError::ResponseParse("weight response is not an array".into()))?;
    match rows.first() {
        None => Ok(0),
        Some(row) => row
            .get("event")
            .and_then(|e| e.get(WEIGHT_COLUMN))
            .and_then(Value::as_f64)
            .map(|count| count.max(0.0) as u64)
            .ok_or_else(|| RequestError::ResponseParse("weight response has no count".into())),
    }
}
