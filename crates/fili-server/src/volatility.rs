//! # Volatility
//!
//! Which parts of a request cover data that may still change. Volatility
//! never blocks a request; it only annotates the response and keeps the
//! partial-data check from treating not-yet-settled buckets as missing.

use crate::config::VolatilityConfig;
use chrono::{DateTime, Duration, Utc};
use fili_core::{Granularity, Interval, SimplifiedIntervalList};
use std::collections::HashMap;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Raw volatile region of one physical table.
pub trait VolatileIntervalsFunction: Send + Sync {
    fn volatile_intervals(&self) -> SimplifiedIntervalList;
}

/// Everything from `window` before now onwards. The open end is capped at a
/// fixed horizon so the interval stays printable.
pub struct TrailingWindowVolatility {
    window: Duration,
    clock: Arc<dyn Clock>,
}

const FUTURE_HORIZON_DAYS: i64 = 3650;

impl TrailingWindowVolatility {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { window, clock }
    }
}

impl VolatileIntervalsFunction for TrailingWindowVolatility {
    fn volatile_intervals(&self) -> SimplifiedIntervalList {
        let now = self.clock.now();
        match Interval::new(now - self.window, now + Duration::days(FUTURE_HORIZON_DAYS)) {
            Ok(interval) => SimplifiedIntervalList::single(interval),
            Err(_) => SimplifiedIntervalList::new(),
        }
    }
}

pub trait VolatileIntervalsService: Send + Sync {
    /// Grain buckets of `requested` that overlap the table's volatile region.
    fn volatile_buckets(
        &self,
        table: &str,
        granularity: Granularity,
        requested: &SimplifiedIntervalList,
    ) -> SimplifiedIntervalList;
}

/// Per-table volatility functions with a fallback for unlisted tables.
pub struct DefaultingVolatileIntervalsService {
    default: Option<Arc<dyn VolatileIntervalsFunction>>,
    tables: HashMap<String, Arc<dyn VolatileIntervalsFunction>>,
}

impl DefaultingVolatileIntervalsService {
    pub fn new(
        default: Option<Arc<dyn VolatileIntervalsFunction>>,
        tables: HashMap<String, Arc<dyn VolatileIntervalsFunction>>,
    ) -> Self {
        Self { default, tables }
    }

    pub fn from_config(config: &VolatilityConfig, clock: Arc<dyn Clock>) -> Self {
        let window = |secs: u64| -> Arc<dyn VolatileIntervalsFunction> {
            Arc::new(TrailingWindowVolatility::new(
                Duration::seconds(secs as i64),
                clock.clone(),
            ))
        };
        let default = (config.default_window_secs > 0).then(|| window(config.default_window_secs));
        let tables = config
            .tables
            .iter()
            .map(|(name, secs)| (name.clone(), window(*secs)))
            .collect();
        Self::new(default, tables)
    }
}

impl VolatileIntervalsService for DefaultingVolatileIntervalsService {
    fn volatile_buckets(
        &self,
        table: &str,
        granularity: Granularity,
        requested: &SimplifiedIntervalList,
    ) -> SimplifiedIntervalList {
        let function = match self.tables.get(table).or(self.default.as_ref()) {
            Some(f) => f,
            None => return SimplifiedIntervalList::new(),
        };
        let volatile = function.volatile_intervals();
        requested
            .iter()
            .flat_map(|interval| granularity.buckets(interval))
            .filter(|bucket| volatile.overlaps(bucket))
            .collect()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
