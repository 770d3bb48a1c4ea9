//! # Result Set Mappers
//!
//! Post-processing registered by the outer stages and applied by the root
//! response processor, in registration order, once the Druid response has
//! been parsed. Each mapper is a pure function of the result set and the
//! response metadata.

use crate::context::{PaginationMetadata, ResponseMetadata};
use crate::error::RequestError;
use fili_core::{ResultRow, ResultSet, SimplifiedIntervalList, SortDirection};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub trait ResultSetMapper: Send + Sync {
    fn name(&self) -> &'static str;

    fn map(&self, result: ResultSet, metadata: &mut ResponseMetadata) -> Result<ResultSet, RequestError>;
}

/// Drops rows that fall inside buckets known to be missing.
pub struct PartialDataMapper {
    missing: SimplifiedIntervalList,
}

impl PartialDataMapper {
    pub fn new(missing: SimplifiedIntervalList) -> Self {
        Self { missing }
    }
}

impl ResultSetMapper for PartialDataMapper {
    fn name(&self) -> &'static str {
        "partial_data"
    }

    fn map(&self, result: ResultSet, _metadata: &mut ResponseMetadata) -> Result<ResultSet, RequestError> {
        let before = result.len();
        let rows: Vec<ResultRow> = result
            .rows
            .iter()
            .filter(|row| !self.missing.contains_instant(row.timestamp))
            .cloned()
            .collect();
        if rows.len() != before {
            tracing::debug!("dropped {} rows in missing buckets", before - rows.len());
        }
        Ok(result.with_rows(rows))
    }
}

/// Keeps the top `threshold` rows of every time bucket, ranked by one metric.
pub struct TopNMapper {
    threshold: usize,
    metric: String,
    direction: SortDirection,
}

impl TopNMapper {
    pub fn new(threshold: usize, metric: &str, direction: SortDirection) -> Self {
        Self {
            threshold,
            metric: metric.to_string(),
            direction,
        }
    }

    fn rank(&self, a: &ResultRow, b: &ResultRow) -> Ordering {
        // Rows without a numeric value sort last in either direction.
        match (a.metric_f64(&self.metric), b.metric_f64(&self.metric)) {
            (Some(x), Some(y)) => {
                let natural = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                match self.direction {
                    SortDirection::Ascending => natural,
                    SortDirection::Descending => natural.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl ResultSetMapper for TopNMapper {
    fn name(&self) -> &'static str {
        "top_n"
    }

    fn map(&self, result: ResultSet, _metadata: &mut ResponseMetadata) -> Result<ResultSet, RequestError> {
        let mut buckets: BTreeMap<_, Vec<ResultRow>> = BTreeMap::new();
        for row in &result.rows {
            buckets.entry(row.timestamp).or_default().push(row.clone());
        }
        let rows = buckets
            .into_values()
            .flat_map(|mut bucket| {
                bucket.sort_by(|a, b| self.rank(a, b));
                bucket.truncate(self.threshold);
                bucket
            })
            .collect();
        Ok(result.with_rows(rows))
    }
}

/// Stable sort on the row timestamp.
pub struct DateTimeSortMapper {
    direction: SortDirection,
}

impl DateTimeSortMapper {
    pub fn new(direction: SortDirection) -> Self {
        Self { direction }
    }
}

impl ResultSetMapper for DateTimeSortMapper {
    fn name(&self) -> &'static str {
        "date_time_sort"
    }

    fn map(&self, result: ResultSet, _metadata: &mut ResponseMetadata) -> Result<ResultSet, RequestError> {
        let mut rows = result.rows.clone();
        match self.direction {
            SortDirection::Ascending => rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            SortDirection::Descending => rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }
        Ok(result.with_rows(rows))
    }
}

pub struct PaginationMapper {
    page: usize,
    per_page: usize,
}

impl PaginationMapper {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }
}

impl ResultSetMapper for PaginationMapper {
    fn name(&self) -> &'static str {
        "pagination"
    }

    fn map(&self, result: ResultSet, metadata: &mut ResponseMetadata) -> Result<ResultSet, RequestError> {
        let total_rows = result.len();
        let pages = total_rows.div_ceil(self.per_page);
        // An empty result still has a first page.
        if self.page > pages.max(1) {
            return Err(RequestError::PageNotFound {
                page: self.page,
                per_page: self.per_page,
                pages,
            });
        }
        metadata.pagination = Some(PaginationMetadata {
            page: self.page,
            per_page: self.per_page,
            total_rows,
            pages,
        });
        let rows = result
            .rows
            .iter()
            .skip((self.page - 1) * self.per_page)
            .take(self.per_page)
            .cloned()
            .collect();
        Ok(result.with_rows(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_set, row};
    use fili_core::Interval;

    #[test]
    fn test_partial_data_mapper_drops_missing_buckets() {
        let rs = result_set(vec![
            row("2015-09-12", "A", 1.0),
            row("2015-09-13", "A", 2.0),
            row("2015-09-14", "A", 3.0),
        ]);
        let mapper = PartialDataMapper::new(SimplifiedIntervalList::single(
            Interval::parse("2015-09-13/2015-09-14").unwrap(),
        ));
        let out = mapper.map(rs, &mut ResponseMetadata::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.rows.iter().all(|r| r.metric_f64("added") != Some(2.0)));
    }

    #[test]
    fn test_top_n_per_bucket() {
        let rs = result_set(vec![
            row("2015-09-12", "A", 1.0),
            row("2015-09-12", "B", 5.0),
            row("2015-09-12", "C", 3.0),
            row("2015-09-13", "D", 7.0),
            row("2015-09-13", "E", 9.0),
        ]);
        let mapper = TopNMapper::new(2, "added", SortDirection::Descending);
        let out = mapper.map(rs, &mut ResponseMetadata::default()).unwrap();
        let pages: Vec<&str> = out.rows.iter().map(|r| r.dimensions["page"].as_str()).collect();
        assert_eq!(pages, vec!["B", "C", "E", "D"]);
    }

    #[test]
    fn test_date_time_sort_is_stable() {
        let rs = result_set(vec![
            row("2015-09-13", "A", 1.0),
            row("2015-09-12", "B", 2.0),
            row("2015-09-13", "C", 3.0),
        ]);
        let out = DateTimeSortMapper::new(SortDirection::Descending)
            .map(rs, &mut ResponseMetadata::default())
            .unwrap();
        let pages: Vec<&str> = out.rows.iter().map(|r| r.dimensions["page"].as_str()).collect();
        assert_eq!(pages, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_pagination_slices_and_records() {
        let rs = result_set((0..5).map(|i| row("2015-09-12", &i.to_string(), i as f64)).collect());
        let mut metadata = ResponseMetadata::default();
        let out = PaginationMapper::new(3, 2).map(rs, &mut metadata).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].dimensions["page"], "4");
        let pagination = metadata.pagination.unwrap();
        assert_eq!(pagination.total_rows, 5);
        assert_eq!(pagination.pages, 3);
    }

    #[test]
    fn test_page_past_the_end() {
        let rs = result_set(vec![row("2015-09-12", "A", 1.0)]);
        let err = PaginationMapper::new(2, 10)
            .map(rs, &mut ResponseMetadata::default())
            .unwrap_err();
        assert!(matches!(err, RequestError::PageNotFound { page: 2, pages: 1, .. }));
    }

    #[test]
    fn test_first_page_of_empty_result() {
        let rs = result_set(vec![]);
        let mut metadata = ResponseMetadata::default();
        let out = PaginationMapper::new(1, 10).map(rs, &mut metadata).unwrap();
        assert!(out.is_empty());
        assert_eq!(metadata.pagination.unwrap().pages, 0);
    }
}
