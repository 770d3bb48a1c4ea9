//! # fili-core — the data model of Fili
//!
//! Everything the Druid workflow passes between its stages: half-open
//! intervals and the simplified interval lists used for availability
//! arithmetic, time grains, the Druid query document, the resolved API
//! request, and the tabular result set.
//!
//! Nothing in this crate performs I/O.

pub mod granularity;
pub mod interval;
pub mod query;
pub mod request;
pub mod result;

pub use granularity::Granularity;
pub use interval::{Interval, IntervalError, SimplifiedIntervalList};
pub use query::{
    Aggregation, DataSource, DruidQuery, Filter, LimitSpec, OrderByColumn, QueryContext,
    QueryType, SortDirection, TopNMetric,
};
pub use request::{
    DataApiRequest, LogicalMetric, PaginationParameters, RequestedDimension, ResponseFormat,
    SortColumn, ValidationError,
};
pub use result::{ResultRow, ResultSet, ResultSetSchema};
