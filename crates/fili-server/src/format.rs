//! # Response Formatting
//!
//! Renders a finished [`DataResponse`] in the requested output format.
//! Dimension columns are reported under their logical names and only the
//! requested logical metrics are emitted; intermediate aggregations stay
//! internal.

use crate::context::PaginationMetadata;
use crate::error::RequestError;
use crate::processor::DataResponse;
use fili_core::{DataApiRequest, ResultRow};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
pub const DATE_TIME_COLUMN: &str = "dateTime";

/// Output column layout shared by both formats.
struct Columns {
    /// (physical, logical)
    dimensions: Vec<(String, String)>,
    metrics: Vec<String>,
}

impl Columns {
    fn new(response: &DataResponse, request: &DataApiRequest) -> Self {
        let logical: HashMap<&str, &str> = request
            .dimensions
            .iter()
            .map(|d| (d.physical_name(), d.name.as_str()))
            .collect();
        let dimensions = response
            .result
            .schema
            .dimensions
            .iter()
            .map(|physical| {
                let name = logical.get(physical.as_str()).copied().unwrap_or(physical.as_str());
                (physical.clone(), name.to_string())
            })
            .collect();
        Self {
            dimensions,
            metrics: request.metrics.iter().map(|m| m.name.clone()).collect(),
        }
    }

    fn header(&self) -> Vec<&str> {
        std::iter::once(DATE_TIME_COLUMN)
            .chain(self.dimensions.iter().map(|(_, name)| name.as_str()))
            .chain(self.metrics.iter().map(String::as_str))
            .collect()
    }
}

fn date_time(row: &ResultRow) -> String {
    row.timestamp.format(DATE_TIME_FORMAT).to_string()
}

// =============================================================================
// JSON
// =============================================================================

/// `{"rows": [...], "meta": {...}}`. `meta` is omitted when there is nothing
/// to report.
pub fn json_body(response: &DataResponse, request: &DataApiRequest) -> Value {
    let columns = Columns::new(response, request);
    let rows: Vec<Value> = response
        .result
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            object.insert(DATE_TIME_COLUMN.into(), Value::String(date_time(row)));
            for (physical, name) in &columns.dimensions {
                let value = row.dimensions.get(physical).cloned().unwrap_or_default();
                object.insert(name.clone(), Value::String(value));
            }
            for metric in &columns.metrics {
                let value = row.metrics.get(metric).cloned().unwrap_or(Value::Null);
                object.insert(metric.clone(), value);
            }
            Value::Object(object)
        })
        .collect();

    let mut body = Map::new();
    body.insert("rows".into(), Value::Array(rows));
    if let Ok(Value::Object(meta)) = serde_json::to_value(&response.metadata) {
        if !meta.is_empty() {
            body.insert("meta".into(), Value::Object(meta));
        }
    }
    Value::Object(body)
}

// =============================================================================
// CSV
// =============================================================================

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Header line then one record per row, quoted where RFC 4180 requires it.
pub fn csv_body(response: &DataResponse, request: &DataApiRequest) -> Result<String, RequestError> {
    let columns = Columns::new(response, request);
    let internal = |e: csv::Error| RequestError::Internal(format!("csv encoding failed: {}", e));

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(columns.header()).map_err(internal)?;
    for row in &response.result.rows {
        let mut record = vec![date_time(row)];
        record.extend(
            columns
                .dimensions
                .iter()
                .map(|(physical, _)| row.dimensions.get(physical).cloned().unwrap_or_default()),
        );
        record.extend(
            columns
                .metrics
                .iter()
                .map(|metric| row.metrics.get(metric).map(cell).unwrap_or_default()),
        );
        writer.write_record(&record).map_err(internal)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| RequestError::Internal(format!("csv flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| RequestError::Internal(e.to_string()))
}

// =============================================================================
// Pagination headers
// =============================================================================

/// `X-Total-Count` plus an RFC 8288 `Link` header with first/prev/next/last
/// relations relative to `path`.
pub fn pagination_headers(pagination: &PaginationMetadata, path: &str) -> Vec<(&'static str, String)> {
    let link = |page: usize, rel: &str| {
        format!(
            "<{}?page={}&perPage={}>; rel=\"{}\"",
            path, page, pagination.per_page, rel
        )
    };
    let last = pagination.pages.max(1);
    let mut links = vec![link(1, "first")];
    if pagination.page > 1 {
        links.push(link(pagination.page - 1, "prev"));
    }
    if pagination.page < last {
        links.push(link(pagination.page + 1, "next"));
    }
    links.push(link(last, "last"));

    vec![
        ("x-total-count", pagination.total_rows.to_string()),
        ("link", links.join(", ")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResponseMetadata;
    use crate::testing::{list, result_set, row, wiki_query, wiki_request};
    use fili_core::RequestedDimension;
    use serde_json::json;

    fn response(rows: Vec<ResultRow>) -> DataResponse {
        DataResponse {
            result: result_set(rows),
            metadata: ResponseMetadata::default(),
            druid_query: wiki_query(),
        }
    }

    fn request() -> DataApiRequest {
        let mut request = wiki_request();
        request.dimensions = vec![RequestedDimension {
            name: "pageName".into(),
            physical_name: Some("page".into()),
            cardinality: None,
        }];
        request
    }

    #[test]
    fn test_json_rows_use_logical_names() {
        let body = json_body(&response(vec![row("2015-09-12", "Foo", 3.0)]), &request());
        assert_eq!(
            body,
            json!({
                "rows": [{
                    "dateTime": "2015-09-12 00:00:00.000",
                    "pageName": "Foo",
                    "added": 3.0,
                }]
            })
        );
    }

    #[test]
    fn test_json_meta_carries_missing_intervals() {
        let mut data = response(vec![]);
        data.metadata.missing_intervals = list(&["2015-09-13/2015-09-14"]);
        let body = json_body(&data, &request());
        assert_eq!(body["rows"], json!([]));
        assert_eq!(
            body["meta"]["missingIntervals"],
            json!(["2015-09-13T00:00:00.000Z/2015-09-14T00:00:00.000Z"])
        );
    }

    #[test]
    fn test_csv_quotes_where_needed() {
        let csv = csv_body(
            &response(vec![
                row("2015-09-12", "Foo", 1.0),
                row("2015-09-12", "Bar, \"the\" page", 2.0),
            ]),
            &request(),
        )
        .unwrap();
        assert_eq!(
            csv,
            "dateTime,pageName,added\r\n\
             2015-09-12 00:00:00.000,Foo,1.0\r\n\
             2015-09-12 00:00:00.000,\"Bar, \"\"the\"\" page\",2.0\r\n"
        );
    }

    #[test]
    fn test_missing_metric_is_an_empty_cell() {
        let mut request = request();
        request.metrics[0].name = "deleted".into();
        let csv = csv_body(&response(vec![row("2015-09-12", "Foo", 1.0)]), &request).unwrap();
        assert!(csv.ends_with("Foo,\r\n"));
    }

    #[test]
    fn test_pagination_links() {
        let headers = pagination_headers(
            &PaginationMetadata {
                page: 2,
                per_page: 10,
                total_rows: 35,
                pages: 4,
            },
            "/v1/data",
        );
        assert_eq!(headers[0], ("x-total-count", "35".to_string()));
        assert_eq!(
            headers[1].1,
            "</v1/data?page=1&perPage=10>; rel=\"first\", \
             </v1/data?page=1&perPage=10>; rel=\"prev\", \
             </v1/data?page=3&perPage=10>; rel=\"next\", \
             </v1/data?page=4&perPage=10>; rel=\"last\""
        );
    }

    #[test]
    fn test_single_page_has_no_prev_or_next() {
        let headers = pagination_headers(
            &PaginationMetadata {
                page: 1,
                per_page: 10,
                total_rows: 0,
                pages: 0,
            },
            "/v1/data",
        );
        assert!(!headers[1].1.contains("prev"));
        assert!(!headers[1].1.contains("next"));
    }
}
