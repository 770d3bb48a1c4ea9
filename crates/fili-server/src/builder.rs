//! # Druid Query Builder
//!
//! Turns a resolved [`DataApiRequest`] into the [`DruidQuery`] that enters
//! the handler chain.

use fili_core::{
    DataApiRequest, DataSource, DruidQuery, LimitSpec, OrderByColumn, QueryContext, QueryType,
    TopNMetric,
};

#[derive(Debug, Clone, Copy)]
pub struct DruidQueryBuilder {
    top_n_enabled: bool,
}

impl DruidQueryBuilder {
    pub fn new(top_n_enabled: bool) -> Self {
        Self { top_n_enabled }
    }

    /// Native topN needs a single grouping dimension and a single metric
    /// sort; everything else with dimensions is a groupBy.
    fn query_type(&self, request: &DataApiRequest) -> QueryType {
        let native_top_n = self.top_n_enabled
            && request.top_n.is_some()
            && request.dimensions.len() == 1
            && request.sorts.len() == 1;
        if native_top_n {
            QueryType::TopN
        } else if request.dimensions.is_empty() {
            QueryType::Timeseries
        } else {
            QueryType::GroupBy
        }
    }

    pub fn build(&self, request: &DataApiRequest, query_id: &str) -> DruidQuery {
        let query_type = self.query_type(request);
        let data_source = match request.physical_tables.as_slice() {
            [single] => DataSource::Table {
                name: single.clone(),
            },
            many => DataSource::Union {
                data_sources: many.to_vec(),
            },
        };
        let dimensions: Vec<String> = request
            .dimensions
            .iter()
            .map(|d| d.physical_name().to_string())
            .collect();
        let aggregations = request
            .metrics
            .iter()
            .flat_map(|m| m.aggregations.iter().cloned())
            .collect();
        let post_aggregations = request
            .metrics
            .iter()
            .flat_map(|m| m.post_aggregations.iter().cloned())
            .collect();

        let (dimension, threshold, metric) = match (query_type, request.sorts.first()) {
            (QueryType::TopN, Some(sort)) => (
                dimensions.first().cloned(),
                request.top_n,
                Some(TopNMetric {
                    metric: sort.metric.clone(),
                    direction: sort.direction,
                }),
            ),
            _ => (None, None, None),
        };

        let limit_spec = match query_type {
            QueryType::GroupBy if !request.sorts.is_empty() || request.count.is_some() => {
                Some(LimitSpec::new(
                    request
                        .sorts
                        .iter()
                        .map(|s| OrderByColumn {
                            dimension: s.metric.clone(),
                            direction: s.direction,
                        })
                        .collect(),
                    request.count,
                ))
            }
            _ => None,
        };

        DruidQuery {
            query_type,
            data_source,
            granularity: request.granularity,
            dimensions: if query_type == QueryType::GroupBy {
                dimensions
            } else {
                Vec::new()
            },
            dimension,
            threshold,
            metric,
            filter: request.filter.clone(),
            aggregations,
            post_aggregations,
            limit_spec,
            intervals: request.interval_list().into_vec(),
            context: QueryContext {
                query_id: Some(query_id.to_string()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wiki_request;
    use fili_core::{RequestedDimension, SortColumn, SortDirection};

    fn with_page(mut request: DataApiRequest) -> DataApiRequest {
        request.dimensions.push(RequestedDimension {
            name: "page".into(),
            physical_name: Some("page_name".into()),
            cardinality: None,
        });
        request
    }

    #[test]
    fn test_no_dimensions_is_timeseries() {
        let query = DruidQueryBuilder::new(true).build(&wiki_request(), "q1");
        assert_eq!(query.query_type, QueryType::Timeseries);
        assert_eq!(query.context.query_id.as_deref(), Some("q1"));
        assert_eq!(query.table_names(), vec!["wiki".to_string()]);
        assert!(query.limit_spec.is_none());
    }

    #[test]
    fn test_group_by_with_limit_spec() {
        let mut request = with_page(wiki_request());
        request.sorts = vec![SortColumn {
            metric: "added".into(),
            direction: SortDirection::Ascending,
        }];
        request.count = Some(5);
        let query = DruidQueryBuilder::new(true).build(&request, "q2");
        assert_eq!(query.query_type, QueryType::GroupBy);
        assert_eq!(query.dimensions, vec!["page_name".to_string()]);
        let limit = query.limit_spec.unwrap();
        assert_eq!(limit.limit, Some(5));
        assert_eq!(limit.columns[0].direction, SortDirection::Ascending);
    }

    #[test]
    fn test_native_top_n_only_when_enabled() {
        let mut request = with_page(wiki_request());
        request.top_n = Some(3);
        request.sorts = vec![SortColumn {
            metric: "added".into(),
            direction: SortDirection::Descending,
        }];
        let native = DruidQueryBuilder::new(true).build(&request, "q3");
        assert_eq!(native.query_type, QueryType::TopN);
        assert_eq!(native.dimension.as_deref(), Some("page_name"));
        assert_eq!(native.threshold, Some(3));
        assert!(native.dimensions.is_empty());

        let group_by = DruidQueryBuilder::new(false).build(&request, "q3");
        assert_eq!(group_by.query_type, QueryType::GroupBy);
    }

    #[test]
    fn test_multiple_tables_become_a_union() {
        let mut request = wiki_request();
        request.physical_tables = vec!["wiki_a".into(), "wiki_b".into()];
        let query = DruidQueryBuilder::new(true).build(&request, "q4");
        assert_eq!(query.table_names(), vec!["wiki_a".to_string(), "wiki_b".to_string()]);
    }
}
