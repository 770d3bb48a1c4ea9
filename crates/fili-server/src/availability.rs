//! # Physical Table Availability
//!
//! The physical table dictionary: per table, the interval list each column is
//! available for, the segment set behind it, and the logical-to-physical
//! column name map. Tables are replaced whole, never edited in place.

use crate::config::{ConfigError, TableConfig};
use crate::error::RequestError;
use fili_core::{DataApiRequest, Granularity, SimplifiedIntervalList};
use fili_druid::{DataSourceMetadata, SegmentInfo};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct PhysicalTable {
    pub name: String,
    columns: HashMap<String, SimplifiedIntervalList>,
    /// Applies to columns without their own entry.
    default_availability: SimplifiedIntervalList,
    column_names: BTreeMap<String, String>,
    segments: Vec<SegmentInfo>,
}

impl PhysicalTable {
    pub fn from_config(table: &TableConfig) -> Result<Self, ConfigError> {
        let (default_availability, columns) = table.seeded_availability()?;
        Ok(Self {
            name: table.name.clone(),
            columns: columns.into_iter().collect(),
            default_availability,
            column_names: table.column_names.clone(),
            segments: Vec::new(),
        })
    }

    pub fn from_metadata(metadata: &DataSourceMetadata, column_names: BTreeMap<String, String>) -> Self {
        Self {
            name: metadata.name.clone(),
            columns: metadata.column_availability(),
            default_availability: SimplifiedIntervalList::new(),
            column_names,
            segments: metadata.segments.clone(),
        }
    }

    pub fn physical_column<'a>(&'a self, name: &'a str) -> &'a str {
        self.column_names.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn column_availability(&self, column: &str) -> SimplifiedIntervalList {
        let physical = self.physical_column(column);
        self.columns
            .get(physical)
            .cloned()
            .unwrap_or_else(|| self.default_availability.clone())
    }

    /// Union over every column.
    pub fn availability(&self) -> SimplifiedIntervalList {
        self.columns
            .values()
            .fold(self.default_availability.clone(), |acc, list| acc.union(list))
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn column_names(&self) -> &BTreeMap<String, String> {
        &self.column_names
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub availability: SimplifiedIntervalList,
    pub columns: BTreeMap<String, SimplifiedIntervalList>,
    pub segment_count: usize,
}

#[derive(Default)]
pub struct PhysicalTableDictionary {
    tables: RwLock<HashMap<String, Arc<PhysicalTable>>>,
}

impl PhysicalTableDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: PhysicalTable) {
        self.tables.write().insert(table.name.clone(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<Arc<PhysicalTable>> {
        self.tables.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn summaries(&self) -> Vec<TableSummary> {
        let mut out: Vec<TableSummary> = self
            .tables
            .read()
            .values()
            .map(|t| TableSummary {
                name: t.name.clone(),
                availability: t.availability(),
                columns: t.columns.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                segment_count: t.segments.len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Intervals where every column the request reads is available in every
    /// physical table it names.
    pub fn availability_for(&self, request: &DataApiRequest) -> Result<SimplifiedIntervalList, RequestError> {
        let columns = request.physical_columns();
        let mut available: Option<SimplifiedIntervalList> = None;
        for name in &request.physical_tables {
            let table = self
                .get(name)
                .ok_or_else(|| RequestError::NoMatchFound(format!("unknown physical table '{}'", name)))?;
            let table_availability = if columns.is_empty() {
                table.availability()
            } else {
                columns
                    .iter()
                    .map(|c| table.column_availability(c))
                    .reduce(|acc, list| acc.intersect(&list))
                    .unwrap_or_default()
            };
            available = Some(match available {
                Some(acc) => acc.intersect(&table_availability),
                None => table_availability,
            });
        }
        Ok(available.unwrap_or_default())
    }
}

/// Grain buckets of `requested` not wholly inside `available`.
pub fn missing_intervals(
    requested: &SimplifiedIntervalList,
    available: &SimplifiedIntervalList,
    granularity: Granularity,
) -> SimplifiedIntervalList {
    requested
        .iter()
        .flat_map(|interval| granularity.buckets(interval))
        .filter(|bucket| !available.covers(bucket))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{iv, list, wiki_request};
    use fili_core::RequestedDimension;

    fn seeded(availability: &[&str]) -> PhysicalTableDictionary {
        let dictionary = PhysicalTableDictionary::new();
        dictionary.insert(
            PhysicalTable::from_config(&TableConfig {
                name: "wiki".into(),
                availability: availability.iter().map(|s| iv(s)).collect(),
                ..Default::default()
            })
            .unwrap(),
        );
        dictionary
    }

    #[test]
    fn test_unknown_table_is_no_match() {
        let dictionary = PhysicalTableDictionary::new();
        let err = dictionary.availability_for(&wiki_request()).unwrap_err();
        assert_eq!(err.kind(), "no_match_found");
    }

    #[test]
    fn test_column_intersection() {
        let dictionary = PhysicalTableDictionary::new();
        let mut table = TableConfig {
            name: "wiki".into(),
            availability: vec![iv("2015-09-01/2015-09-20")],
            ..Default::default()
        };
        table
            .columns
            .insert("added".into(), vec![iv("2015-09-05/2015-09-30")]);
        dictionary.insert(PhysicalTable::from_config(&table).unwrap());

        let mut request = wiki_request();
        request.dimensions.push(RequestedDimension {
            name: "page".into(),
            physical_name: None,
            cardinality: None,
        });
        let available = dictionary.availability_for(&request).unwrap();
        assert_eq!(available, list(&["2015-09-05/2015-09-20"]));
    }

    #[test]
    fn test_missing_buckets() {
        let missing = missing_intervals(
            &list(&["2015-09-10/2015-09-14"]),
            &list(&["2015-09-01/2015-09-12"]),
            Granularity::Day,
        );
        assert_eq!(missing, list(&["2015-09-12/2015-09-14"]));
    }

    #[test]
    fn test_partially_covered_bucket_is_missing() {
        let missing = missing_intervals(
            &list(&["2015-09-01/2015-10-01"]),
            &list(&["2015-09-01/2015-09-20"]),
            Granularity::Month,
        );
        assert_eq!(missing, list(&["2015-09-01/2015-10-01"]));
    }

    #[test]
    fn test_full_coverage_has_nothing_missing() {
        let dictionary = seeded(&["2015-09-01/2015-09-20"]);
        let available = dictionary.availability_for(&wiki_request()).unwrap();
        let request = wiki_request();
        assert!(missing_intervals(&request.interval_list(), &available, request.granularity).is_empty());
    }

    #[test]
    fn test_logical_column_names_map_to_physical() {
        let mut table = TableConfig {
            name: "wiki".into(),
            ..Default::default()
        };
        table.columns.insert("page_name".into(), vec![iv("2015-09-01/2015-09-02")]);
        table.column_names.insert("page".into(), "page_name".into());
        let table = PhysicalTable::from_config(&table).unwrap();
        assert_eq!(table.column_availability("page"), list(&["2015-09-01/2015-09-02"]));
    }
}
