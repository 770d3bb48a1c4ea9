//! # Response Parsing
//!
//! Druid answers groupBy, topN and timeseries queries with three different
//! JSON shapes. All of them are flattened here into one [`ResultSet`] shape.

use fili_core::interval::parse_instant;
use fili_core::{DruidQuery, Interval, QueryType, ResultRow, ResultSet, ResultSetSchema};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseParseError {
    #[error("expected a JSON array from druid, got {0}")]
    NotAnArray(String),

    #[error("druid row {index} is missing '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("druid row {index} has an unparseable timestamp '{value}'")]
    BadTimestamp { index: usize, value: String },

    #[error("malformed uncovered interval '{0}'")]
    BadInterval(String),
}

/// Flatten a Druid response body into a result set shaped by `query`.
pub fn parse_result_set(query: &DruidQuery, body: &Value) -> Result<ResultSet, ResponseParseError> {
    let schema = ResultSetSchema {
        granularity: query.granularity,
        dimensions: query.output_dimensions(),
        metrics: query.output_metrics(),
    };
    let entries = body
        .as_array()
        .ok_or_else(|| ResponseParseError::NotAnArray(kind_of(body).to_string()))?;

    let mut rows = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let timestamp = entry_timestamp(index, entry)?;
        match query.query_type {
            QueryType::GroupBy => {
                let event = entry
                    .get("event")
                    .ok_or(ResponseParseError::MissingField { index, field: "event" })?;
                rows.push(build_row(&schema, timestamp, event));
            }
            QueryType::Timeseries => {
                let result = entry
                    .get("result")
                    .ok_or(ResponseParseError::MissingField { index, field: "result" })?;
                rows.push(build_row(&schema, timestamp, result));
            }
            QueryType::TopN => {
                let results = entry
                    .get("result")
                    .and_then(Value::as_array)
                    .ok_or(ResponseParseError::MissingField { index, field: "result" })?;
                rows.extend(results.iter().map(|r| build_row(&schema, timestamp, r)));
            }
        }
    }
    Ok(ResultSet::new(schema, rows))
}

fn entry_timestamp(index: usize, entry: &Value) -> Result<chrono::DateTime<chrono::Utc>, ResponseParseError> {
    let raw = entry
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or(ResponseParseError::MissingField { index, field: "timestamp" })?;
    parse_instant(raw).ok_or_else(|| ResponseParseError::BadTimestamp {
        index,
        value: raw.to_string(),
    })
}

fn build_row(schema: &ResultSetSchema, timestamp: chrono::DateTime<chrono::Utc>, fields: &Value) -> ResultRow {
    let dimensions: BTreeMap<String, String> = schema
        .dimensions
        .iter()
        .map(|d| {
            let value = match fields.get(d) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            (d.clone(), value)
        })
        .collect();
    let metrics: BTreeMap<String, Value> = schema
        .metrics
        .iter()
        .map(|m| (m.clone(), fields.get(m).cloned().unwrap_or(Value::Null)))
        .collect();
    ResultRow {
        timestamp,
        dimensions,
        metrics,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Druid's report of intervals it had no segments for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncoveredIntervals {
    pub intervals: Vec<Interval>,
    pub overflowed: bool,
}

/// Read `uncoveredIntervals`/`uncoveredIntervalsOverflowed` from the
/// response-context header value.
pub fn parse_uncovered_intervals(context: &Value) -> Result<UncoveredIntervals, ResponseParseError> {
    let intervals = match context.get("uncoveredIntervals").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .map(|v| {
                let text = v.as_str().unwrap_or_default();
                Interval::parse(text).map_err(|_| ResponseParseError::BadInterval(text.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let overflowed = context
        .get("uncoveredIntervalsOverflowed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(UncoveredIntervals {
        intervals,
        overflowed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fili_core::{Aggregation, DataSource, Granularity, QueryContext};
    use serde_json::json;

    fn query(query_type: QueryType) -> DruidQuery {
        DruidQuery {
            query_type,
            data_source: DataSource::Table { name: "wiki".into() },
            granularity: Granularity::Day,
            dimensions: if query_type == QueryType::GroupBy { vec!["page".into()] } else { vec![] },
            dimension: if query_type == QueryType::TopN { Some("page".into()) } else { None },
            threshold: None,
            metric: None,
            filter: None,
            aggregations: vec![Aggregation::new("longSum", "added", Some("added"))],
            post_aggregations: vec![json!({"type": "arithmetic", "name": "ratio", "fn": "/", "fields": []})],
            limit_spec: None,
            intervals: vec![Interval::parse("2015-09-12/2015-09-14").unwrap()],
            context: QueryContext::default(),
        }
    }

    #[test]
    fn test_group_by_rows() {
        let body = json!([
            {"version": "v1", "timestamp": "2015-09-12T00:00:00.000Z",
             "event": {"page": "Main", "added": 10, "ratio": 0.5}},
            {"version": "v1", "timestamp": "2015-09-13T00:00:00.000Z",
             "event": {"page": null, "added": 3}}
        ]);
        let rs = parse_result_set(&query(QueryType::GroupBy), &body).unwrap();
        assert_eq!(rs.schema.metrics, vec!["added".to_string(), "ratio".to_string()]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.rows[0].dimensions["page"], "Main");
        assert_eq!(rs.rows[1].dimensions["page"], "");
        assert_eq!(rs.rows[1].metrics["ratio"], Value::Null);
    }

    #[test]
    fn test_top_n_rows_are_flattened() {
        let body = json!([
            {"timestamp": "2015-09-12T00:00:00.000Z", "result": [
                {"page": "A", "added": 9}, {"page": "B", "added": 4}
            ]},
            {"timestamp": "2015-09-13T00:00:00.000Z", "result": [
                {"page": "C", "added": 7}
            ]}
        ]);
        let rs = parse_result_set(&query(QueryType::TopN), &body).unwrap();
        assert_eq!(rs.len(), 3);
        assert_eq!(rs.schema.dimensions, vec!["page".to_string()]);
        assert_eq!(rs.rows[2].dimensions["page"], "C");
    }

    #[test]
    fn test_timeseries_rows() {
        let body = json!([{"timestamp": "2015-09-12T00:00:00.000Z", "result": {"added": 1}}]);
        let rs = parse_result_set(&query(QueryType::Timeseries), &body).unwrap();
        assert_eq!(rs.rows[0].metric_f64("added"), Some(1.0));
        assert!(rs.rows[0].dimensions.is_empty());
    }

    #[test]
    fn test_rejects_non_array_body() {
        let err = parse_result_set(&query(QueryType::GroupBy), &json!({"error": "x"})).unwrap_err();
        assert_eq!(err, ResponseParseError::NotAnArray("an object".into()));
    }

    #[test]
    fn test_uncovered_intervals() {
        let ctx = json!({
            "uncoveredIntervals": ["2015-09-12T00:00:00.000Z/2015-09-13T00:00:00.000Z"],
            "uncoveredIntervalsOverflowed": true
        });
        let uncovered = parse_uncovered_intervals(&ctx).unwrap();
        assert_eq!(uncovered.intervals.len(), 1);
        assert!(uncovered.overflowed);
        assert_eq!(parse_uncovered_intervals(&json!({})).unwrap(), UncoveredIntervals::default());
    }
}
