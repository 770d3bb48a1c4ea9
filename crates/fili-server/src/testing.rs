//! Fixtures shared by the unit tests: the "wiki" table, interval shorthands
//! and an in-memory Druid service.

use chrono::{DateTime, Utc};
use fili_core::interval::parse_instant;
use fili_core::{
    Aggregation, DataApiRequest, DataSource, DruidQuery, Granularity, Interval, LogicalMetric,
    QueryContext, QueryType, ResponseFormat, ResultRow, ResultSet, ResultSetSchema,
    SimplifiedIntervalList,
};
use fili_druid::{
    DataSourceMetadata, DruidServiceConfig, DruidWebService, SegmentInfo, WebServiceOutcome,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

pub fn iv(text: &str) -> Interval {
    Interval::parse(text).unwrap()
}

pub fn list(intervals: &[&str]) -> SimplifiedIntervalList {
    SimplifiedIntervalList::simplify(intervals.iter().map(|s| iv(s)))
}

pub fn instant(text: &str) -> DateTime<Utc> {
    parse_instant(text).unwrap()
}

/// Daily groupBy of `added` by `page` over 2015-09-12.
pub fn wiki_query() -> DruidQuery {
    DruidQuery {
        query_type: QueryType::GroupBy,
        data_source: DataSource::Table {
            name: "wiki".into(),
        },
        granularity: Granularity::Day,
        dimensions: vec!["page".into()],
        dimension: None,
        threshold: None,
        metric: None,
        filter: None,
        aggregations: vec![Aggregation::new("longSum", "added", Some("added"))],
        post_aggregations: vec![],
        limit_spec: None,
        intervals: vec![iv("2015-09-12/2015-09-13")],
        context: QueryContext {
            query_id: Some("abc".into()),
            ..Default::default()
        },
    }
}

pub fn wiki_request() -> DataApiRequest {
    DataApiRequest {
        logical_table: "wiki".into(),
        physical_tables: vec!["wiki".into()],
        granularity: Granularity::Day,
        dimensions: vec![],
        metrics: vec![LogicalMetric {
            name: "added".into(),
            aggregations: vec![Aggregation::new("longSum", "added", Some("added"))],
            post_aggregations: vec![],
        }],
        intervals: vec![iv("2015-09-12/2015-09-13")],
        filter: None,
        sorts: vec![],
        date_time_sort: None,
        top_n: None,
        count: None,
        pagination: None,
        format: ResponseFormat::Json,
    }
}

pub fn result_set(rows: Vec<ResultRow>) -> ResultSet {
    ResultSet::new(
        ResultSetSchema {
            granularity: Granularity::Day,
            dimensions: vec!["page".into()],
            metrics: vec!["added".into()],
        },
        rows,
    )
}

pub fn row(date: &str, page: &str, added: f64) -> ResultRow {
    ResultRow {
        timestamp: instant(date),
        dimensions: BTreeMap::from([("page".to_string(), page.to_string())]),
        metrics: BTreeMap::from([("added".to_string(), json!(added))]),
    }
}

pub fn segment(interval: &str, version: &str) -> SegmentInfo {
    SegmentInfo {
        id: format!("wiki_{}_{}", interval.replace('/', "_"), version),
        interval: iv(interval),
        version: version.into(),
        dimensions: vec!["page".into()],
        metrics: vec!["added".into()],
        size: 1024,
    }
}

/// One daily segment per day of 2015-09-01 through 2015-09-19.
pub fn wiki_metadata(version: &str) -> DataSourceMetadata {
    let start = instant("2015-09-01");
    let segments = Granularity::Day
        .buckets(&Interval::new(start, instant("2015-09-20")).unwrap())
        .into_iter()
        .map(|day| segment(&day.to_string(), version))
        .collect();
    DataSourceMetadata {
        name: "wiki".into(),
        segments,
    }
}

/// A groupBy response body with one `{page, added}` event per entry.
pub fn group_by_body(rows: &[(&str, &str, i64)]) -> serde_json::Value {
    rows.iter()
        .map(|(date, page, added)| {
            json!({
                "version": "v1",
                "timestamp": format!("{}T00:00:00.000Z", date),
                "event": {"page": page, "added": added},
            })
        })
        .collect()
}

// =============================================================================
// In-memory Druid
// =============================================================================

/// What the fake service was asked to do.
#[derive(Clone, Copy)]
pub enum FakeCall<'a> {
    Query(&'a DruidQuery),
    Get(&'a str),
}

type Responder = Box<dyn Fn(FakeCall<'_>) -> WebServiceOutcome + Send + Sync>;
type Delay = Box<dyn Fn(&DruidQuery) -> Option<Duration> + Send + Sync>;

pub struct FakeDruidService {
    config: DruidServiceConfig,
    responder: Responder,
    delay: Option<Delay>,
    queries: Mutex<Vec<DruidQuery>>,
    paths: Mutex<Vec<String>>,
}

impl FakeDruidService {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(FakeCall<'_>) -> WebServiceOutcome + Send + Sync + 'static,
    {
        Self {
            config: DruidServiceConfig::new("fake", "http://druid.test", 1_000, None),
            responder: Box::new(responder),
            delay: None,
            queries: Mutex::new(Vec::new()),
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: DruidServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&DruidQuery) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn queries(&self) -> Vec<DruidQuery> {
        self.queries.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

#[async_trait::async_trait]
impl DruidWebService for FakeDruidService {
    fn config(&self) -> &DruidServiceConfig {
        &self.config
    }

    async fn post_query(&self, query: &DruidQuery) -> WebServiceOutcome {
        self.queries.lock().push(query.clone());
        if let Some(wait) = self.delay.as_ref().and_then(|d| d(query)) {
            tokio::time::sleep(wait).await;
        }
        (self.responder)(FakeCall::Query(query))
    }

    async fn get_json(&self, path: &str) -> WebServiceOutcome {
        self.paths.lock().push(path.to_string());
        (self.responder)(FakeCall::Get(path))
    }
}
