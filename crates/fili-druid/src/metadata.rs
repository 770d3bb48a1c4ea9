//! # Segment Metadata
//!
//! Parsing of the coordinator's `datasources/{name}?full` document into the
//! segment set that availability and segment signatures are derived from.

use fili_core::{Interval, SimplifiedIntervalList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: String,
    pub interval: Interval,
    pub version: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub size: u64,
}

impl SegmentInfo {
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.dimensions.iter().chain(self.metrics.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceMetadata {
    pub name: String,
    pub segments: Vec<SegmentInfo>,
}

impl DataSourceMetadata {
    /// Per-column union of the intervals of every segment holding the column.
    pub fn column_availability(&self) -> HashMap<String, SimplifiedIntervalList> {
        let mut by_column: HashMap<String, Vec<Interval>> = HashMap::new();
        for segment in &self.segments {
            for column in segment.columns() {
                by_column
                    .entry(column.clone())
                    .or_default()
                    .push(segment.interval);
            }
        }
        by_column
            .into_iter()
            .map(|(column, intervals)| (column, SimplifiedIntervalList::simplify(intervals)))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataParseError {
    #[error("datasource metadata is not valid JSON for '{name}': {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawDataSource {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    #[serde(default, alias = "identifier")]
    id: Option<String>,
    interval: Interval,
    #[serde(default)]
    version: String,
    #[serde(default)]
    dimensions: String,
    #[serde(default)]
    metrics: String,
    #[serde(default)]
    size: u64,
}

fn split_columns(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_datasource_metadata(
    name: &str,
    body: &serde_json::Value,
) -> Result<DataSourceMetadata, MetadataParseError> {
    let raw: RawDataSource =
        serde_json::from_value(body.clone()).map_err(|source| MetadataParseError::Json {
            name: name.to_string(),
            source,
        })?;
    let segments = raw
        .segments
        .into_iter()
        .map(|s| SegmentInfo {
            id: s
                .id
                .unwrap_or_else(|| format!("{}_{}_{}", name, s.interval, s.version)),
            interval: s.interval,
            version: s.version,
            dimensions: split_columns(&s.dimensions),
            metrics: split_columns(&s.metrics),
            size: s.size,
        })
        .collect();
    Ok(DataSourceMetadata {
        name: name.to_string(),
        segments,
    })
}
