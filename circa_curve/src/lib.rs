//! Cycle-averaged activity/temperature curves for multi-day recordings.
//!
//! Raw per-minute, per-subject samples are reduced to per-bin-of-day means,
//! optionally restricted to phase-positive (estrus) or phase-negative days.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod cycle;
pub mod daily;
pub mod ingest;
pub mod narration;
pub mod series;

pub use aggregate::{
    accumulate, aggregate, build_curve, group_average, Accumulator, AggregationRequest,
    GroupCurve, PhaseFilter, Pooling, SubjectCurve,
};
pub use cycle::{classify, BinIndex, CycleModel, CycleParams, Resolution};
pub use daily::{build_daily_hourly_curve, DailyCurves, DayRange};
pub use ingest::{parse_sheet, parse_sheet_csv, read_sheet_csv, Measure, SheetKind};
#[cfg(feature = "xlsx")]
pub use ingest::{load_workbook, parse_workbook, read_workbook_sheet};
pub use narration::{day_steps, day_title, format_bin_time, DayStep, ViewState};
pub use series::{RawSeries, Sample};

#[derive(Error, Debug)]
pub enum CurveError {
    #[error("group average requested over zero curves")]
    EmptyGroup,
    #[error("curve length mismatch: expected {expected} bins, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid cycle model: {0}")]
    InvalidCycleModel(String),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error("duplicate subject identifier: {0}")]
    DuplicateSubject(String),
    #[error("failed to parse sheet: {0}")]
    SheetParse(String),
    #[error("sheet not found: {0}")]
    MissingSheet(String),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One mean value per bin of day, in bin order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve {
    values: Vec<f64>,
}

impl Curve {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// A curve of `bins` zeros, the value of a bin nothing contributed to.
    pub fn zeros(bins: usize) -> Self {
        Self {
            values: vec![0.0; bins],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, bin: usize) -> Option<f64> {
        self.values.get(bin).copied()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Largest bin value, or `None` for an empty curve.
    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }
}

impl From<Vec<f64>> for Curve {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_requested_length() {
        let curve = Curve::zeros(24);
        assert_eq!(curve.len(), 24);
        assert!(curve.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn min_max_ignore_order() {
        let curve = Curve::from(vec![3.0, -1.0, 7.5, 2.0]);
        assert_eq!(curve.max(), Some(7.5));
        assert_eq!(curve.min(), Some(-1.0));
        assert_eq!(Curve::default().max(), None);
    }

    #[test]
    fn curve_serializes_as_plain_array() {
        let json = serde_json::to_string(&Curve::from(vec![1.5, 0.0])).unwrap();
        assert_eq!(json, "[1.5,0.0]");
    }

    #[test]
    fn error_messages_carry_context() {
        let err = CurveError::DimensionMismatch {
            expected: 24,
            found: 1440,
        };
        assert_eq!(
            err.to_string(),
            "curve length mismatch: expected 24 bins, found 1440"
        );
    }
}
