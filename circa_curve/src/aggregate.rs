//! Per-subject mean curves, group averages and the combined aggregator.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cycle::CycleModel;
use crate::series::RawSeries;
use crate::{Curve, CurveError};

/// Which days contribute to a curve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseFilter {
    All,
    PositiveOnly,
    NegativeOnly,
}

impl Default for PhaseFilter {
    fn default() -> Self {
        PhaseFilter::All
    }
}

impl PhaseFilter {
    pub fn admits(self, phase_positive: bool) -> bool {
        match self {
            PhaseFilter::All => true,
            PhaseFilter::PositiveOnly => phase_positive,
            PhaseFilter::NegativeOnly => !phase_positive,
        }
    }
}

/// How a group's samples are combined.
///
/// `PerSubject` normalizes every subject to its own mean curve and then
/// averages those curves unweighted. `Pooled` sums every member's samples
/// into one accumulator, so subjects with more samples in a bin weigh more.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Pooling {
    PerSubject,
    Pooled,
}

impl Default for Pooling {
    fn default() -> Self {
        Pooling::PerSubject
    }
}

/// Running sum and sample count per bin.
#[derive(Clone, Debug, PartialEq)]
pub struct Accumulator {
    sum: Vec<f64>,
    count: Vec<u64>,
}

impl Accumulator {
    pub fn new(bins: usize) -> Self {
        Self {
            sum: vec![0.0; bins],
            count: vec![0; bins],
        }
    }

    pub fn bins(&self) -> usize {
        self.sum.len()
    }

    pub fn add(&mut self, bin: usize, value: f64) {
        self.sum[bin] += value;
        self.count[bin] += 1;
    }

    pub fn sums(&self) -> &[f64] {
        &self.sum
    }

    pub fn counts(&self) -> &[u64] {
        &self.count
    }

    pub fn total_count(&self) -> u64 {
        self.count.iter().sum()
    }

    pub fn merge(&mut self, other: &Accumulator) -> Result<(), CurveError> {
        if other.bins() != self.bins() {
            return Err(CurveError::DimensionMismatch {
                expected: self.bins(),
                found: other.bins(),
            });
        }
        for (s, o) in self.sum.iter_mut().zip(&other.sum) {
            *s += o;
        }
        for (c, o) in self.count.iter_mut().zip(&other.count) {
            *c += o;
        }
        Ok(())
    }

    /// Mean per bin; bins without samples are 0.
    pub fn mean_curve(&self) -> Curve {
        self.sum
            .iter()
            .zip(&self.count)
            .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
            .collect::<Vec<_>>()
            .into()
    }
}

/// Sum and count one subject's samples per bin of day.
pub fn accumulate(
    series: &RawSeries,
    subject: &str,
    model: &CycleModel,
    filter: PhaseFilter,
) -> Result<Accumulator, CurveError> {
    let column = series.column(subject)?;
    let mut acc = Accumulator::new(model.bins_per_day());
    for (i, &value) in column.iter().enumerate() {
        let slot = model.classify(i);
        if !filter.admits(slot.phase_positive) {
            continue;
        }
        acc.add(slot.bin, value);
    }
    Ok(acc)
}

/// Mean curve of one subject over the days admitted by `filter`.
pub fn build_curve(
    series: &RawSeries,
    subject: &str,
    model: &CycleModel,
    filter: PhaseFilter,
) -> Result<Curve, CurveError> {
    Ok(accumulate(series, subject, model, filter)?.mean_curve())
}

/// Unweighted bin-wise mean of equally long curves.
pub fn group_average(curves: &[Curve]) -> Result<Curve, CurveError> {
    let first = curves.first().ok_or(CurveError::EmptyGroup)?;
    let bins = first.len();
    if let Some(bad) = curves.iter().find(|c| c.len() != bins) {
        return Err(CurveError::DimensionMismatch {
            expected: bins,
            found: bad.len(),
        });
    }
    let mut out = vec![0.0; bins];
    for curve in curves {
        for (o, v) in out.iter_mut().zip(curve.values()) {
            *o += v;
        }
    }
    let n = curves.len() as f64;
    for o in &mut out {
        *o /= n;
    }
    Ok(Curve::new(out))
}

/// Subjects to combine and how.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregationRequest {
    pub subjects: Vec<String>,
    #[serde(default)]
    pub filter: PhaseFilter,
    #[serde(default)]
    pub pooling: Pooling,
}

impl AggregationRequest {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subjects: subjects.into_iter().map(Into::into).collect(),
            filter: PhaseFilter::All,
            pooling: Pooling::PerSubject,
        }
    }

    /// Every subject of `series`, in column order.
    pub fn all_subjects(series: &RawSeries) -> Self {
        Self::new(series.subjects().iter().cloned())
    }

    pub fn with_filter(mut self, filter: PhaseFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubjectCurve {
    pub subject: String,
    pub curve: Curve,
}

/// A group's mean curve together with its members' own curves.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupCurve {
    pub mean: Curve,
    pub members: Vec<SubjectCurve>,
}

/// Group curve for `request`; member curves are built in parallel.
pub fn aggregate(
    series: &RawSeries,
    model: &CycleModel,
    request: &AggregationRequest,
) -> Result<GroupCurve, CurveError> {
    if request.subjects.is_empty() {
        return Err(CurveError::EmptyGroup);
    }

    let accumulators = request
        .subjects
        .par_iter()
        .map(|subject| accumulate(series, subject, model, request.filter))
        .collect::<Result<Vec<_>, _>>()?;

    let members: Vec<SubjectCurve> = request
        .subjects
        .iter()
        .zip(&accumulators)
        .map(|(subject, acc)| SubjectCurve {
            subject: subject.clone(),
            curve: acc.mean_curve(),
        })
        .collect();

    let mean = match request.pooling {
        Pooling::PerSubject => {
            let curves: Vec<Curve> = members.iter().map(|m| m.curve.clone()).collect();
            group_average(&curves)?
        }
        Pooling::Pooled => {
            let mut pooled = Accumulator::new(model.bins_per_day());
            for acc in &accumulators {
                pooled.merge(acc)?;
            }
            pooled.mean_curve()
        }
    };

    debug!(
        subjects = request.subjects.len(),
        bins = model.bins_per_day(),
        filter = ?request.filter,
        pooling = ?request.pooling,
        "aggregated group curve"
    );

    Ok(GroupCurve { mean, members })
}
