//! Buffered result sets of one multi-statement round trip.

use crate::db::types::Record;
use crate::error::{DbError, DbResult};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;

/// Ordered cursor over buffered result sets. Each set is read once, in order.
#[derive(Debug, Default)]
pub struct ResultSets {
    sets: VecDeque<Vec<Record>>,
    next: usize,
    total: usize,
}

impl ResultSets {
    pub(crate) fn new(sets: Vec<Vec<Record>>) -> Self {
        Self {
            total: sets.len(),
            sets: sets.into(),
            next: 0,
        }
    }

    /// Index of the set the next read returns.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Sets not yet read.
    pub fn remaining(&self) -> usize {
        self.sets.len()
    }

    pub fn is_consumed(&self) -> bool {
        self.sets.is_empty()
    }

    /// Take the next set as records.
    pub fn read_records(&mut self) -> DbResult<Vec<Record>> {
        let set = self.sets.pop_front().ok_or_else(|| {
            DbError::sequence(format!(
                "result set {} requested but only {} were returned",
                self.next, self.total
            ))
        })?;
        self.next += 1;
        Ok(set)
    }

    /// Decode the next set.
    pub fn read<T: DeserializeOwned>(&mut self) -> DbResult<Vec<T>> {
        self.read_records()?.iter().map(Record::decode).collect()
    }

    /// Decode the set at `index`, which must be the next unread one.
    pub fn read_at<T: DeserializeOwned>(&mut self, index: usize) -> DbResult<Vec<T>> {
        if index != self.next {
            return Err(DbError::sequence(format!(
                "result set {index} requested out of order; set {} is next",
                self.next
            )));
        }
        self.read()
    }

    /// First row of the next set, if it has one.
    pub fn read_first<T: DeserializeOwned>(&mut self) -> DbResult<Option<T>> {
        self.read_records()?.first().map(Record::decode).transpose()
    }

    /// The only row of the next set.
    pub fn read_single<T: DeserializeOwned>(&mut self) -> DbResult<T> {
        let index = self.next;
        match self.read_records()?.as_slice() {
            [row] => row.decode(),
            rows => Err(DbError::not_exactly_one(
                format!("result set {index}"),
                rows.len(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Brand {
        brand_id: i64,
        brand_name: String,
    }

    fn brand(id: i64, name: &str) -> Record {
        Record::new(
            Arc::from(vec!["BRAND_ID".to_string(), "brand_name".to_string()]),
            vec![json!(id), json!(name)],
        )
    }

    fn count(n: i64) -> Record {
        Record::new(Arc::from(vec!["n".to_string()]), vec![json!(n)])
    }

    #[test]
    fn test_read_in_order() {
        let mut sets = ResultSets::new(vec![
            vec![brand(1, "Electra"), brand(2, "Haro")],
            vec![count(2)],
        ]);
        let brands: Vec<Brand> = sets.read().unwrap();
        assert_eq!(brands[1].brand_name, "Haro");

        #[derive(Deserialize)]
        struct Count {
            n: i64,
        }
        let total: Count = sets.read_single().unwrap();
        assert_eq!(total.n, 2);
        assert!(sets.is_consumed());
    }

    #[test]
    fn test_read_beyond_end_is_sequence_error() {
        let mut sets = ResultSets::new(vec![vec![count(1)]]);
        sets.read_records().unwrap();
        assert!(matches!(
            sets.read::<Brand>(),
            Err(DbError::Sequence { .. })
        ));
    }

    #[test]
    fn test_read_beyond_end_reports_set_count() {
        let mut sets = ResultSets::new(vec![vec![count(1)], vec![], vec![count(2)]]);
        assert_eq!(sets.remaining(), 3);
        while !sets.is_consumed() {
            sets.read_records().unwrap();
        }
        let err = sets.read_records().unwrap_err();
        assert!(
            err.to_string().contains("result set 3 requested but only 3 were returned"),
            "got {err}"
        );
    }

    #[test]
    fn test_read_at_out_of_order() {
        let mut sets = ResultSets::new(vec![vec![brand(1, "Electra")], vec![count(1)]]);
        assert!(matches!(
            sets.read_at::<Brand>(1),
            Err(DbError::Sequence { .. })
        ));
        // A failed out-of-order read consumes nothing.
        assert_eq!(sets.position(), 0);
        assert_eq!(sets.read_at::<Brand>(0).unwrap().len(), 1);
        sets.read_records().unwrap();
        assert!(matches!(
            sets.read_at::<Brand>(0),
            Err(DbError::Sequence { .. })
        ));
    }

    #[test]
    fn test_read_first_and_single_on_empty_set() {
        let mut sets = ResultSets::new(vec![vec![], vec![]]);
        assert_eq!(sets.read_first::<Brand>().unwrap(), None);
        match sets.read_single::<Brand>() {
            Err(DbError::NotExactlyOne { count, .. }) => assert_eq!(count, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
