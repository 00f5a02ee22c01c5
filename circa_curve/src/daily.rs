//! Per-day curves for day-by-day narration.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{group_average, Accumulator, Pooling};
use crate::cycle::{CycleModel, Resolution};
use crate::series::RawSeries;
use crate::{Curve, CurveError};

/// Days `1..=max_day` are eligible for materialization.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayRange {
    pub max_day: usize,
}

impl Default for DayRange {
    fn default() -> Self {
        Self { max_day: 14 }
    }
}

/// One curve per materialized day.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyCurves {
    bins: usize,
    days: BTreeMap<usize, Curve>,
}

impl DailyCurves {
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of materialized days.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, day: usize) -> bool {
        self.days.contains_key(&day)
    }

    /// Curve for `day`; days outside the materialized range read as zeros.
    pub fn day(&self, day: usize) -> Curve {
        self.days
            .get(&day)
            .cloned()
            .unwrap_or_else(|| Curve::zeros(self.bins))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Curve)> + '_ {
        self.days.iter().map(|(&day, curve)| (day, curve))
    }
}

/// Hourly per-day curves for `subjects`.
///
/// `model` supplies the day length and estrus cycle; its bins are replaced
/// by one bin per hour. Complete days from 1 up to `range.max_day` are
/// materialized and a partial trailing day is left out. `Pooling::Pooled`
/// accumulates all subjects' samples of a (day, hour) together;
/// `Pooling::PerSubject` averages each subject's per-day curve with equal
/// weight.
pub fn build_daily_hourly_curve(
    series: &RawSeries,
    subjects: &[String],
    model: &CycleModel,
    range: DayRange,
    pooling: Pooling,
) -> Result<DailyCurves, CurveError> {
    let model = model.with_resolution(Resolution::Hour)?;
    if subjects.is_empty() {
        return Err(CurveError::EmptyGroup);
    }
    let last_day = model.whole_days(series.len()).min(range.max_day);
    let horizon = last_day * model.units_per_day();

    let per_subject = subjects
        .par_iter()
        .map(|subject| -> Result<Vec<Accumulator>, CurveError> {
            let column = series.column(subject)?;
            let mut days = vec![Accumulator::new(model.bins_per_day()); last_day];
            for (i, &value) in column.iter().take(horizon).enumerate() {
                let slot = model.classify(i);
                days[slot.day - 1].add(slot.bin, value);
            }
            Ok(days)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut days = BTreeMap::new();
    for day in 1..=last_day {
        let curve = match pooling {
            Pooling::Pooled => {
                let mut pooled = Accumulator::new(model.bins_per_day());
                for subject_days in &per_subject {
                    pooled.merge(&subject_days[day - 1])?;
                }
                pooled.mean_curve()
            }
            Pooling::PerSubject => {
                let curves: Vec<Curve> = per_subject
                    .iter()
                    .map(|subject_days| subject_days[day - 1].mean_curve())
                    .collect();
                group_average(&curves)?
            }
        };
        days.insert(day, curve);
    }

    debug!(
        days = last_day,
        subjects = subjects.len(),
        ?pooling,
        "built daily curves"
    );

    Ok(DailyCurves {
        bins: model.bins_per_day(),
        days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Minute rows for `samples` minutes, one value per subject from `value(minute, subject)`.
    fn minutes(
        samples: usize,
        subjects: usize,
        value: impl Fn(usize, usize) -> f64,
    ) -> Vec<Vec<f64>> {
        (0..samples)
            .map(|i| (0..subjects).map(|s| value(i, s)).collect())
            .collect()
    }

    /// Two whole days plus half an hour of day 3.
    ///
    /// Subject `a` reads `day` in the first half of each hour and `day + 2`
    /// in the second; subject `b` reads `10 * day`.
    fn series() -> RawSeries {
        let rows = minutes(2 * 1440 + 30, 2, |i, s| {
            let day = (i / 1440 + 1) as f64;
            match s {
                0 if i % 60 < 30 => day,
                0 => day + 2.0,
                _ => 10.0 * day,
            }
        });
        RawSeries::new(ids(&["a", "b"]), rows).unwrap()
    }

    #[test]
    fn pooled_means_per_day_and_hour() {
        let daily = build_daily_hourly_curve(
            &series(),
            &ids(&["a", "b"]),
            &CycleModel::hourly(),
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap();
        assert_eq!(daily.len(), 2);
        // (mean(a) + mean(b)) / 2 with equal counts
        assert_eq!(daily.day(1).get(0), Some((2.0 + 10.0) / 2.0));
        assert_eq!(daily.day(2).get(23), Some((3.0 + 20.0) / 2.0));
    }

    #[test]
    fn partial_trailing_day_is_not_materialized() {
        let rows = minutes(1440 + 60, 1, |_, _| 1.0);
        let series = RawSeries::new(ids(&["m1"]), rows).unwrap();
        let daily = build_daily_hourly_curve(
            &series,
            &ids(&["m1"]),
            &CycleModel::hourly(),
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap();
        assert_eq!(daily.len(), 1);
        assert!(!daily.contains(2));
        assert_eq!(daily.day(2).get(0), Some(0.0));
    }

    #[test]
    fn out_of_range_day_reads_as_zeros() {
        let daily = build_daily_hourly_curve(
            &series(),
            &ids(&["a"]),
            &CycleModel::hourly(),
            DayRange { max_day: 1 },
            Pooling::Pooled,
        )
        .unwrap();
        assert!(daily.contains(1));
        assert!(!daily.contains(2));
        assert_eq!(daily.day(2), Curve::zeros(24));
        assert_eq!(daily.day(0).len(), 24);
    }

    #[test]
    fn pooling_modes_agree_on_dense_series() {
        let subjects = ids(&["a", "b"]);
        let pooled = build_daily_hourly_curve(
            &series(),
            &subjects,
            &CycleModel::hourly(),
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap();
        let per_subject = build_daily_hourly_curve(
            &series(),
            &subjects,
            &CycleModel::hourly(),
            DayRange::default(),
            Pooling::PerSubject,
        )
        .unwrap();
        // every subject covers every minute, so both policies weigh alike
        assert_eq!(pooled, per_subject);
    }

    #[test]
    fn empty_subject_set_fails() {
        let err = build_daily_hourly_curve(
            &series(),
            &[],
            &CycleModel::hourly(),
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap_err();
        assert!(matches!(err, CurveError::EmptyGroup));
    }

    #[test]
    fn minute_model_is_binned_by_hour() {
        let rows = minutes(1440, 1, |i, _| (i / 60) as f64);
        let series = RawSeries::new(ids(&["m1"]), rows).unwrap();
        let daily = build_daily_hourly_curve(
            &series,
            &ids(&["m1"]),
            &CycleModel::minute(),
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap();
        assert_eq!(daily.bins(), 24);
        let day = daily.day(1);
        assert_eq!(day.len(), 24);
        assert_eq!(day.get(0), Some(0.0));
        assert_eq!(day.get(23), Some(23.0));
    }

    #[test]
    fn day_length_without_whole_hours_is_rejected() {
        let series = RawSeries::new(ids(&["m1"]), vec![vec![1.0]; 8]).unwrap();
        let short_day = CycleModel::new(4, 2, 4, 2).unwrap();
        let err = build_daily_hourly_curve(
            &series,
            &ids(&["m1"]),
            &short_day,
            DayRange::default(),
            Pooling::Pooled,
        )
        .unwrap_err();
        assert!(matches!(err, CurveError::InvalidCycleModel(_)));
    }
}
