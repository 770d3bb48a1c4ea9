//! # Druid Query Model
//!
//! The serializable request descriptor posted to a Druid broker. A query is
//! built once per logical request and only rewritten through the `with_*`
//! methods, each of which returns a new value.

use crate::granularity::Granularity;
use crate::interval::{Interval, SimplifiedIntervalList};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    GroupBy,
    TopN,
    Timeseries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(alias = "asc")]
    Ascending,
    #[default]
    #[serde(alias = "desc")]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DataSource {
    Table {
        name: String,
    },
    Union {
        #[serde(rename = "dataSources")]
        data_sources: Vec<String>,
    },
    Query {
        query: Box<DruidQuery>,
    },
}

impl DataSource {
    /// Physical tables read by this data source, nested queries included.
    pub fn table_names(&self) -> Vec<String> {
        match self {
            Self::Table { name } => vec![name.clone()],
            Self::Union { data_sources } => data_sources.clone(),
            Self::Query { query } => query.data_source.table_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl Aggregation {
    pub fn new(kind: &str, name: &str, field_name: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            field_name: field_name.map(str::to_string),
        }
    }

    pub fn count(name: &str) -> Self {
        Self::new("count", name, None)
    }
}

/// Druid filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Filter {
    Selector { dimension: String, value: String },
    In { dimension: String, values: Vec<String> },
    And { fields: Vec<Filter> },
    Or { fields: Vec<Filter> },
    Not { field: Box<Filter> },
}

impl Filter {
    /// Number of leaf value clauses Druid has to evaluate.
    pub fn clause_count(&self) -> usize {
        match self {
            Self::Selector { .. } => 1,
            Self::In { values, .. } => values.len(),
            Self::And { fields } | Self::Or { fields } => fields.iter().map(Filter::clause_count).sum(),
            Self::Not { field } => field.clause_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByColumn {
    pub dimension: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub columns: Vec<OrderByColumn>,
}

impl LimitSpec {
    pub fn new(columns: Vec<OrderByColumn>, limit: Option<usize>) -> Self {
        Self {
            kind: "default".to_string(),
            limit,
            columns,
        }
    }
}

/// TopN ordering metric. Druid spells ascending order as an `inverted` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopNMetric {
    pub metric: String,
    pub direction: SortDirection,
}

impl Serialize for TopNMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.direction {
            SortDirection::Descending => serializer.serialize_str(&self.metric),
            SortDirection::Ascending => serde_json::json!({
                "type": "inverted",
                "metric": self.metric,
            })
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TopNMetric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(metric) => Ok(Self {
                metric,
                direction: SortDirection::Descending,
            }),
            serde_json::Value::Object(map) => {
                let metric = map
                    .get("metric")
                    .and_then(|m| m.as_str())
                    .ok_or_else(|| serde::de::Error::custom("inverted metric without 'metric'"))?;
                Ok(Self {
                    metric: metric.to_string(),
                    direction: SortDirection::Ascending,
                })
            }
            other => Err(serde::de::Error::custom(format!(
                "unsupported topN metric spec: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncovered_intervals_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DruidQuery {
    pub query_type: QueryType,
    pub data_source: DataSource,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<TopNMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregations: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_spec: Option<LimitSpec>,
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub context: QueryContext,
}

impl DruidQuery {
    pub fn with_intervals(&self, intervals: Vec<Interval>) -> Self {
        Self {
            intervals,
            ..self.clone()
        }
    }

    pub fn with_context(&self, context: QueryContext) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    pub fn with_data_source(&self, data_source: DataSource) -> Self {
        Self {
            data_source,
            ..self.clone()
        }
    }

    pub fn interval_list(&self) -> SimplifiedIntervalList {
        SimplifiedIntervalList::simplify(self.intervals.iter().copied())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.data_source.table_names()
    }

    /// Dimension columns that come back in each result row.
    pub fn output_dimensions(&self) -> Vec<String> {
        match self.query_type {
            QueryType::TopN => self.dimension.iter().cloned().collect(),
            _ => self.dimensions.clone(),
        }
    }

    /// Metric columns that come back in each result row.
    pub fn output_metrics(&self) -> Vec<String> {
        let post = self
            .post_aggregations
            .iter()
            .filter_map(|p| p.get("name").and_then(|n| n.as_str()).map(str::to_string));
        self.aggregations
            .iter()
            .map(|a| a.name.clone())
            .chain(post)
            .collect()
    }

    /// Serialization with per-request context removed. Two requests for the
    /// same data produce the same text.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut canonical = self.clone();
        canonical.context.query_id = None;
        if let DataSource::Query { query } = &mut canonical.data_source {
            query.context.query_id = None;
        }
        serde_json::to_string(&canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wiki_query() -> DruidQuery {
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
            intervals: vec![Interval::parse("2015-09-12/2015-09-13").unwrap()],
            context: QueryContext {
                query_id: Some("abc".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_serializes_druid_field_names() {
        let json = serde_json::to_value(wiki_query()).unwrap();
        assert_eq!(json["queryType"], "groupBy");
        assert_eq!(json["dataSource"]["type"], "table");
        assert_eq!(json["dataSource"]["name"], "wiki");
        assert_eq!(json["granularity"], "day");
        assert_eq!(json["aggregations"][0]["fieldName"], "added");
        assert_eq!(
            json["intervals"][0],
            "2015-09-12T00:00:00.000Z/2015-09-13T00:00:00.000Z"
        );
        assert_eq!(json["context"]["queryId"], "abc");
        assert!(json.get("dimension").is_none());
    }

    #[test]
    fn test_canonical_json_ignores_query_id() {
        let a = wiki_query();
        let mut b = wiki_query();
        b.context.query_id = Some("other".into());
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());

        let c = a.with_intervals(vec![Interval::parse("2015-09-13/2015-09-14").unwrap()]);
        assert_ne!(a.canonical_json().unwrap(), c.canonical_json().unwrap());
    }

    #[test]
    fn test_filter_clause_count() {
        let filter = Filter::And {
            fields: vec![
                Filter::Selector {
                    dimension: "page".into(),
                    value: "Main".into(),
                },
                Filter::Not {
                    field: Box::new(Filter::In {
                        dimension: "user".into(),
                        values: vec!["a".into(), "b".into(), "c".into()],
                    }),
                },
            ],
        };
        assert_eq!(filter.clause_count(), 4);
    }

    #[test]
    fn test_topn_metric_inverted_for_ascending() {
        let asc = TopNMetric {
            metric: "added".into(),
            direction: SortDirection::Ascending,
        };
        let json = serde_json::to_value(&asc).unwrap();
        assert_eq!(json["type"], "inverted");
        let back: TopNMetric = serde_json::from_value(json).unwrap();
        assert_eq!(back, asc);
    }

    #[test]
    fn test_nested_table_names() {
        let inner = wiki_query();
        let outer = inner.with_data_source(DataSource::Query {
            query: Box::new(inner.clone()),
        });
        assert_eq!(outer.table_names(), vec!["wiki".to_string()]);
    }
}
