//! # Response Cache
//!
//! Shared, bounded key/value store of serialized Druid responses. Keys are
//! the SHA-256 of the canonical query text. Entries are whole-value
//! replacements; the oldest key is evicted first once the entry bound is hit.
//!
//! Which entries count as live depends on the [`CacheMode`](crate::config::CacheMode): TTL entries
//! expire at a fixed instant, local-signature entries are live while their
//! stored segment signature matches the current one.

pub mod signing;

pub use signing::{QuerySigningService, SegmentIntervalsSigningService};

use chrono::{DateTime, Duration, Utc};
use fili_core::DruidQuery;
use fili_druid::DruidResponse;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("response of {size} bytes exceeds the {limit} byte entry limit")]
    TooLarge { size: usize, limit: usize },

    #[error("could not serialize for caching: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cached entry failed its checksum")]
    Corrupt,
}

pub fn cache_key(query: &DruidQuery) -> Result<String, serde_json::Error> {
    let canonical = query.canonical_json()?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: String,
    pub response_context: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub checksum: u32,
}

impl CachedResponse {
    pub fn from_response(
        response: &DruidResponse,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        signature: Option<String>,
    ) -> Result<Self, CacheError> {
        let body = serde_json::to_string(&response.body)?;
        let response_context = response
            .response_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            checksum: crc32fast::hash(body.as_bytes()),
            body,
            response_context,
            stored_at: now,
            expires_at,
            signature,
        })
    }

    pub fn size(&self) -> usize {
        self.body.len() + self.response_context.as_ref().map_or(0, String::len)
    }

    pub fn to_response(&self) -> Result<DruidResponse, CacheError> {
        if crc32fast::hash(self.body.as_bytes()) != self.checksum {
            return Err(CacheError::Corrupt);
        }
        let body = serde_json::from_str(&self.body)?;
        let response_context = self
            .response_context
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(DruidResponse {
            body,
            response_context,
            etag: self.signature.clone(),
        })
    }

    fn is_live(&self, now: DateTime<Utc>, signature: Option<&str>) -> bool {
        if self.expires_at.is_some_and(|at| at <= now) {
            return false;
        }
        match signature {
            Some(current) => self.signature.as_deref() == Some(current),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub store_failures: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, CachedResponse>,
    order: VecDeque<String>,
}

pub struct ResponseCache {
    entries: Mutex<Entries>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
        }
    }

    /// Live entry for `key`. With a `signature`, only an entry stored under
    /// the same signature is live. Expired entries are dropped on the way.
    pub fn lookup(&self, key: &str, now: DateTime<Utc>, signature: Option<&str>) -> Option<CachedResponse> {
        let mut entries = self.entries.lock();
        let (found, expired) = match entries.map.get(key) {
            Some(entry) if entry.is_live(now, signature) => (Some(entry.clone()), false),
            Some(entry) => (None, entry.expires_at.is_some_and(|at| at <= now)),
            None => (None, false),
        };
        if expired {
            entries.map.remove(key);
            entries.order.retain(|k| k != key);
        }
        drop(entries);
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn store(&self, key: &str, entry: CachedResponse, max_entry_bytes: usize) -> Result<(), CacheError> {
        if entry.size() > max_entry_bytes {
            self.store_failures.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::TooLarge {
                size: entry.size(),
                limit: max_entry_bytes,
            });
        }
        let mut entries = self.entries.lock();
        if entries.map.insert(key.to_string(), entry).is_some() {
            entries.order.retain(|k| k != key);
        }
        entries.order.push_back(key.to_string());
        while entries.map.len() > self.max_entries {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.map.remove(&oldest);
                }
                None => break,
            }
        }
        self.stores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `key` has a live entry, without touching the hit and miss
    /// counters.
    pub fn is_live(&self, key: &str, now: DateTime<Utc>, signature: Option<&str>) -> bool {
        self.entries
            .lock()
            .map
            .get(key)
            .is_some_and(|entry| entry.is_live(now, signature))
    }

    pub fn record_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.map.len();
        entries.map.clear();
        entries.order.clear();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().map.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Which entries count as live. Selected once at start-up.
pub enum CacheStrategy {
    Ttl { ttl: Duration },
    LocalSignature { signer: Arc<dyn QuerySigningService> },
}

/// Where one query's response lives in the cache under the active strategy.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    pub key: String,
    signature: Option<String>,
    ttl: Option<Duration>,
}

/// The cache plus the strategy deciding what is live. Shared by every stage
/// that reads or writes responses.
pub struct CachePolicy {
    cache: Arc<ResponseCache>,
    strategy: CacheStrategy,
    max_entry_bytes: usize,
}

impl CachePolicy {
    pub fn new(cache: Arc<ResponseCache>, strategy: CacheStrategy, max_entry_bytes: usize) -> Self {
        Self {
            cache,
            strategy,
            max_entry_bytes,
        }
    }

    /// `None` when the query cannot be cached: no key can be derived, or the
    /// segment signature is unknown.
    pub fn slot(&self, query: &DruidQuery) -> Option<CacheSlot> {
        let key = match cache_key(query) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("cannot derive cache key: {}", e);
                return None;
            }
        };
        match &self.strategy {
            CacheStrategy::Ttl { ttl } => Some(CacheSlot {
                key,
                signature: None,
                ttl: Some(*ttl),
            }),
            CacheStrategy::LocalSignature { signer } => Some(CacheSlot {
                key,
                signature: Some(signer.segment_signature(query)?),
                ttl: None,
            }),
        }
    }

    pub fn is_live(&self, slot: &CacheSlot) -> bool {
        self.cache.is_live(&slot.key, Utc::now(), slot.signature.as_deref())
    }

    /// The live response stored in `slot`. Unreadable entries are logged and
    /// read as a miss.
    pub fn lookup(&self, slot: &CacheSlot) -> Option<DruidResponse> {
        let entry = self.cache.lookup(&slot.key, Utc::now(), slot.signature.as_deref())?;
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(key = %slot.key, "unreadable cache entry: {}", e);
                None
            }
        }
    }

    /// Best effort: failures are logged and counted, never returned.
    pub fn store(&self, slot: &CacheSlot, response: &DruidResponse) {
        let now = Utc::now();
        let entry = match CachedResponse::from_response(
            response,
            now,
            slot.ttl.map(|ttl| now + ttl),
            slot.signature.clone(),
        ) {
            Ok(entry) => entry,
            Err(e) => {
                self.cache.record_failure();
                tracing::warn!(key = %slot.key, "cache write failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.store(&slot.key, entry, self.max_entry_bytes) {
            tracing::warn!(key = %slot.key, "cache write skipped: {}", e);
        }
    }
}
