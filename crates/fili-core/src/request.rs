//! # Resolved Data Requests
//!
//! The already-validated, configuration-resolved API request handed to the
//! workflow. Metric, dimension and table names have been bound upstream; the
//! workflow only reads this value.

use crate::granularity::Granularity;
use crate::interval::{Interval, SimplifiedIntervalList};
use crate::query::{Aggregation, Filter, SortDirection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("request names no physical table for logical table '{0}'")]
    NoPhysicalTable(String),

    #[error("at least one metric is required")]
    NoMetrics,

    #[error("at least one interval is required")]
    NoIntervals,

    #[error("interval {interval} is not aligned to the {granularity} grain")]
    UnalignedInterval { interval: String, granularity: String },

    #[error("sort column '{0}' is not a requested metric")]
    UnknownSortColumn(String),

    #[error("topN requires exactly one metric sort")]
    TopNWithoutSort,

    #[error("invalid pagination: page and perPage must be positive")]
    InvalidPagination,

    #[error("{0} must be positive")]
    NonPositive(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedDimension {
    pub name: String,
    #[serde(default)]
    pub physical_name: Option<String>,
    /// Estimated number of distinct values, used by the weight check.
    #[serde(default)]
    pub cardinality: Option<u64>,
}

impl RequestedDimension {
    pub fn physical_name(&self) -> &str {
        self.physical_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalMetric {
    pub name: String,
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub post_aggregations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub metric: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParameters {
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataApiRequest {
    pub logical_table: String,
    pub physical_tables: Vec<String>,
    pub granularity: Granularity,
    #[serde(default)]
    pub dimensions: Vec<RequestedDimension>,
    pub metrics: Vec<LogicalMetric>,
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub sorts: Vec<SortColumn>,
    #[serde(default)]
    pub date_time_sort: Option<SortDirection>,
    #[serde(default)]
    pub top_n: Option<usize>,
    /// Overall row cap.
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub pagination: Option<PaginationParameters>,
    #[serde(default)]
    pub format: ResponseFormat,
}

impl DataApiRequest {
    pub fn interval_list(&self) -> SimplifiedIntervalList {
        SimplifiedIntervalList::simplify(self.intervals.iter().copied())
    }

    /// Physical columns the request reads: dimension columns plus the fields
    /// aggregated by its metrics.
    pub fn physical_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .dimensions
            .iter()
            .map(|d| d.physical_name().to_string())
            .collect();
        for metric in &self.metrics {
            for aggregation in &metric.aggregations {
                if let Some(field) = &aggregation.field_name {
                    columns.push(field.clone());
                }
            }
        }
        columns.sort();
        columns.dedup();
        columns
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.physical_tables.is_empty() {
            return Err(ValidationError::NoPhysicalTable(self.logical_table.clone()));
        }
        if self.metrics.is_empty() {
            return Err(ValidationError::NoMetrics);
        }
        if self.intervals.is_empty() {
            return Err(ValidationError::NoIntervals);
        }
        if let Some(bad) = self
            .intervals
            .iter()
            .find(|i| !self.granularity.is_aligned(i))
        {
            return Err(ValidationError::UnalignedInterval {
                interval: bad.to_string(),
                granularity: self.granularity.to_string(),
            });
        }
        if let Some(sort) = self
            .sorts
            .iter()
            .find(|s| !self.metrics.iter().any(|m| m.name == s.metric))
        {
            return Err(ValidationError::UnknownSortColumn(sort.metric.clone()));
        }
        if let Some(top_n) = self.top_n {
            if top_n == 0 {
                return Err(ValidationError::NonPositive("topN"));
            }
            if self.sorts.len() != 1 {
                return Err(ValidationError::TopNWithoutSort);
            }
        }
        if self.count == Some(0) {
            return Err(ValidationError::NonPositive("count"));
        }
        if let Some(p) = self.pagination {
            if p.page == 0 || p.per_page == 0 {
                return Err(ValidationError::InvalidPagination);
            }
        }
        Ok(())
    }
}
