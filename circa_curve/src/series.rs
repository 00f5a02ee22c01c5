//! Per-minute measurements for a closed set of subjects.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::CurveError;

/// Time-ordered samples, one row per elapsed time unit and one column per
/// subject. The subject set is fixed when the series is built.
#[derive(Clone, Debug)]
pub struct RawSeries {
    subjects: Vec<String>,
    index: HashMap<String, usize>,
    values: Array2<f64>,
}

impl RawSeries {
    /// Build from row-major samples; every row must carry one value per subject.
    pub fn new(subjects: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, CurveError> {
        let width = subjects.len();
        let height = rows.len();
        let mut flat = Vec::with_capacity(width * height);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(CurveError::SheetParse(format!(
                    "sample {} has {} values for {} subjects",
                    i,
                    row.len(),
                    width
                )));
            }
            flat.extend(row);
        }
        let values = Array2::from_shape_vec((height, width), flat)
            .map_err(|e| CurveError::SheetParse(e.to_string()))?;
        Self::from_array(subjects, values)
    }

    /// Build from a `samples × subjects` matrix.
    pub fn from_array(subjects: Vec<String>, values: Array2<f64>) -> Result<Self, CurveError> {
        if values.ncols() != subjects.len() {
            return Err(CurveError::SheetParse(format!(
                "matrix has {} columns for {} subjects",
                values.ncols(),
                subjects.len()
            )));
        }
        let mut index = HashMap::with_capacity(subjects.len());
        for (col, id) in subjects.iter().enumerate() {
            if index.insert(id.clone(), col).is_some() {
                return Err(CurveError::DuplicateSubject(id.clone()));
            }
        }
        Ok(Self {
            subjects,
            index,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn subject_index(&self, subject: &str) -> Option<usize> {
        self.index.get(subject).copied()
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.index.contains_key(subject)
    }

    /// All samples of one subject, in time order.
    pub fn column(&self, subject: &str) -> Result<ArrayView1<'_, f64>, CurveError> {
        let col = self
            .subject_index(subject)
            .ok_or_else(|| CurveError::UnknownSubject(subject.to_string()))?;
        Ok(self.values.column(col))
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn sample(&self, index: usize) -> Option<Sample<'_>> {
        if index >= self.len() {
            return None;
        }
        Some(Sample {
            index,
            subjects: &self.subjects,
            lookup: &self.index,
            row: self.values.row(index),
        })
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample<'_>> + '_ {
        self.values
            .axis_iter(Axis(0))
            .enumerate()
            .map(move |(index, row)| Sample {
                index,
                subjects: &self.subjects,
                lookup: &self.index,
                row,
            })
    }
}

/// One time step: subject identifier → measurement.
#[derive(Clone, Debug)]
pub struct Sample<'a> {
    index: usize,
    subjects: &'a [String],
    lookup: &'a HashMap<String, usize>,
    row: ArrayView1<'a, f64>,
}

impl<'a> Sample<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, subject: &str) -> Option<f64> {
        self.lookup.get(subject).map(|&col| self.row[col])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + '_ {
        self.subjects
            .iter()
            .map(String::as_str)
            .zip(self.row.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn samples_map_subjects_to_values() {
        let series = RawSeries::new(
            ids(&["m1", "m2"]),
            vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0]],
        )
        .unwrap();
        assert_eq!(series.len(), 3);
        let second = series.sample(1).unwrap();
        assert_eq!(second.index(), 1);
        assert_eq!(second.get("m2"), Some(20.0));
        assert_eq!(second.get("m3"), None);
        let pairs: Vec<_> = second.iter().collect();
        assert_eq!(pairs, vec![("m1", 2.0), ("m2", 20.0)]);
        assert!(series.sample(3).is_none());
    }

    #[test]
    fn column_follows_time_order() {
        let series =
            RawSeries::new(ids(&["a", "b"]), vec![vec![1.0, 4.0], vec![2.0, 5.0]]).unwrap();
        let col: Vec<f64> = series.column("b").unwrap().to_vec();
        assert_eq!(col, vec![4.0, 5.0]);
        assert!(matches!(
            series.column("zz"),
            Err(CurveError::UnknownSubject(id)) if id == "zz"
        ));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = RawSeries::new(ids(&["a", "b"]), vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, CurveError::SheetParse(_)));
    }

    #[test]
    fn duplicate_subjects_rejected() {
        let err = RawSeries::new(ids(&["a", "a"]), vec![vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, CurveError::DuplicateSubject(id) if id == "a"));
    }

    #[test]
    fn empty_series_keeps_subjects() {
        let series = RawSeries::new(ids(&["a"]), Vec::new()).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.subjects(), &["a".to_string()]);
        assert_eq!(series.samples().count(), 0);
    }
}
