//! Segment signatures for the local-signature cache. A signature changes
//! whenever the set of segments behind a query's intervals changes, which is
//! what invalidates a cached response without a TTL.

use crate::availability::PhysicalTableDictionary;
use fili_core::DruidQuery;
use std::sync::Arc;

pub trait QuerySigningService: Send + Sync {
    /// `None` when the segment set is unknown; such queries bypass the cache.
    fn segment_signature(&self, query: &DruidQuery) -> Option<String>;
}

/// CRC32 over the sorted `id:version` pairs of every segment overlapping the
/// query intervals. Depends only on coordinator data, so it is stable across
/// restarts.
pub struct SegmentIntervalsSigningService {
    dictionary: Arc<PhysicalTableDictionary>,
}

impl SegmentIntervalsSigningService {
    pub fn new(dictionary: Arc<PhysicalTableDictionary>) -> Self {
        Self { dictionary }
    }
}

impl QuerySigningService for SegmentIntervalsSigningService {
    fn segment_signature(&self, query: &DruidQuery) -> Option<String> {
        let intervals = query.interval_list();
        let mut parts: Vec<String> = Vec::new();
        for name in query.table_names() {
            let table = self.dictionary.get(&name)?;
            if table.segments().is_empty() {
                return None;
            }
            parts.extend(
                table
                    .segments()
                    .iter()
                    .filter(|s| intervals.overlaps(&s.interval))
                    .map(|s| format!("{}:{}:{}", name, s.id, s.version)),
            );
        }
        parts.sort();
        let mut hasher = crc32fast::Hasher::new();
        for part in &parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        Some(format!("{:08x}", hasher.finalize()))
    }
}
