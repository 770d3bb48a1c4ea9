//! # fili-druid — the Druid web service client
//!
//! Posts serialized queries to Druid brokers, reads coordinator metadata, and
//! turns whatever comes back into a [`WebServiceOutcome`]: a parsed success,
//! a typed HTTP error, or a transport failure.

pub mod client;
pub mod metadata;
pub mod response;
pub mod service;

pub use client::HttpDruidWebService;
pub use metadata::{parse_datasource_metadata, DataSourceMetadata, SegmentInfo};
pub use response::{parse_result_set, parse_uncovered_intervals, ResponseParseError, UncoveredIntervals};
pub use service::{DruidResponse, DruidServiceConfig, DruidWebService, TransportFailure, WebServiceOutcome};
