//! # Segment Metadata Loader
//!
//! Background task polling the coordinator for the full segment list of every
//! polled table. Each successful fetch replaces the table in the dictionary
//! whole; failures leave the previous availability in place.

use crate::availability::{PhysicalTable, PhysicalTableDictionary};
use chrono::{DateTime, Utc};
use fili_druid::{parse_datasource_metadata, DruidWebService};
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct SegmentMetadataLoader {
    coordinator: Arc<dyn DruidWebService>,
    dictionary: Arc<PhysicalTableDictionary>,
    /// Table name and its logical-to-physical column names.
    tables: Vec<(String, BTreeMap<String, String>)>,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub loaded: usize,
    pub failed: usize,
}

impl SegmentMetadataLoader {
    pub fn new(
        coordinator: Arc<dyn DruidWebService>,
        dictionary: Arc<PhysicalTableDictionary>,
        tables: Vec<(String, BTreeMap<String, String>)>,
    ) -> Self {
        Self {
            coordinator,
            dictionary,
            tables,
            last_success: RwLock::new(None),
        }
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    pub async fn refresh(&self) -> RefreshReport {
        let fetches = self.tables.iter().map(|(name, column_names)| async move {
            let path = format!("/datasources/{}?full", name);
            let body = match self.coordinator.get_json(&path).await {
                fili_druid::WebServiceOutcome::Success(response) => response.body,
                other => {
                    tracing::warn!("metadata refresh for '{}' failed: {:?}", name, other);
                    return false;
                }
            };
            match parse_datasource_metadata(name, &body) {
                Ok(metadata) => {
                    tracing::debug!("'{}' has {} segments", name, metadata.segments.len());
                    self.dictionary
                        .insert(PhysicalTable::from_metadata(&metadata, column_names.clone()));
                    true
                }
                Err(e) => {
                    tracing::warn!("metadata for '{}' unusable: {}", name, e);
                    false
                }
            }
        });

        let mut report = RefreshReport::default();
        for loaded in join_all(fetches).await {
            if loaded {
                report.loaded += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.failed == 0 {
            *self.last_success.write() = Some(Utc::now());
        }
        report
    }

    /// Refresh forever on a fixed period.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let report = self.refresh().await;
            tracing::info!(
                loaded = report.loaded,
                failed = report.failed,
                "segment metadata refreshed"
            );
        }
    }
}
