//! # Result Sets
//!
//! The uniform tabular shape every Druid response is parsed into before
//! post-processing and formatting.

use crate::granularity::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetSchema {
    pub granularity: Granularity,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub timestamp: DateTime<Utc>,
    /// Null dimension values are stored as empty strings.
    pub dimensions: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl ResultRow {
    pub fn metric_f64(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|v| v.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub schema: ResultSetSchema,
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn new(schema: ResultSetSchema, rows: Vec<ResultRow>) -> Self {
        Self { schema, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same schema, different rows.
    pub fn with_rows(&self, rows: Vec<ResultRow>) -> Self {
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }
}
