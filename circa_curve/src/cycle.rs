//! Sample index to (day, bin, phase) mapping.

use serde::{Deserialize, Serialize};

use crate::CurveError;

pub const MINUTES_PER_DAY: usize = 1440;
pub const HOURS_PER_DAY: usize = 24;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    Hour,
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Minute
    }
}

/// Unchecked cycle parameters, as written in configuration.
///
/// [`build`](Self::build) turns them into a [`CycleModel`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleParams {
    pub units_per_day: usize,
    pub bins_per_day: usize,
    pub phase_cycle_length: usize,
    pub phase_offset: usize,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            units_per_day: MINUTES_PER_DAY,
            bins_per_day: MINUTES_PER_DAY,
            phase_cycle_length: 4,
            phase_offset: 2,
        }
    }
}

impl CycleParams {
    pub fn build(self) -> Result<CycleModel, CurveError> {
        if self.units_per_day == 0 {
            return Err(CurveError::InvalidCycleModel(
                "units_per_day must be positive".into(),
            ));
        }
        if self.bins_per_day == 0 {
            return Err(CurveError::InvalidCycleModel(
                "bins_per_day must be positive".into(),
            ));
        }
        if self.units_per_day % self.bins_per_day != 0 {
            return Err(CurveError::InvalidCycleModel(format!(
                "bins_per_day {} does not divide units_per_day {}",
                self.bins_per_day, self.units_per_day
            )));
        }
        if self.phase_cycle_length == 0 {
            return Err(CurveError::InvalidCycleModel(
                "phase_cycle_length must be positive".into(),
            ));
        }
        Ok(CycleModel {
            units_per_day: self.units_per_day,
            bins_per_day: self.bins_per_day,
            phase_cycle_length: self.phase_cycle_length,
            phase_offset: self.phase_offset,
        })
    }
}

/// Day length, binning and estrus cycle parameters.
///
/// A day is phase-positive when `(day - phase_offset) mod phase_cycle_length == 0`,
/// with days numbered from 1. Every `CycleModel` is valid: day and cycle
/// lengths are positive and `bins_per_day` divides `units_per_day`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CycleParams", into = "CycleParams")]
pub struct CycleModel {
    units_per_day: usize,
    bins_per_day: usize,
    phase_cycle_length: usize,
    phase_offset: usize,
}

impl Default for CycleModel {
    fn default() -> Self {
        Self {
            units_per_day: MINUTES_PER_DAY,
            bins_per_day: MINUTES_PER_DAY,
            phase_cycle_length: 4,
            phase_offset: 2,
        }
    }
}

impl TryFrom<CycleParams> for CycleModel {
    type Error = CurveError;

    fn try_from(params: CycleParams) -> Result<Self, Self::Error> {
        params.build()
    }
}

impl From<CycleModel> for CycleParams {
    fn from(model: CycleModel) -> Self {
        model.params()
    }
}

/// Position of one sample within the cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinIndex {
    pub day: usize,
    pub minute_of_day: usize,
    pub bin: usize,
    pub phase_positive: bool,
}

impl CycleModel {
    pub fn new(
        units_per_day: usize,
        bins_per_day: usize,
        phase_cycle_length: usize,
        phase_offset: usize,
    ) -> Result<Self, CurveError> {
        CycleParams {
            units_per_day,
            bins_per_day,
            phase_cycle_length,
            phase_offset,
        }
        .build()
    }

    pub fn minute() -> Self {
        Self::default()
    }

    pub fn hourly() -> Self {
        Self {
            bins_per_day: HOURS_PER_DAY,
            ..Self::default()
        }
    }

    pub fn params(&self) -> CycleParams {
        CycleParams {
            units_per_day: self.units_per_day,
            bins_per_day: self.bins_per_day,
            phase_cycle_length: self.phase_cycle_length,
            phase_offset: self.phase_offset,
        }
    }

    pub fn units_per_day(&self) -> usize {
        self.units_per_day
    }

    pub fn bins_per_day(&self) -> usize {
        self.bins_per_day
    }

    pub fn phase_cycle_length(&self) -> usize {
        self.phase_cycle_length
    }

    pub fn phase_offset(&self) -> usize {
        self.phase_offset
    }

    /// One bin per time unit, or one per hour of day.
    pub fn with_resolution(self, resolution: Resolution) -> Result<Self, CurveError> {
        match resolution {
            Resolution::Minute => self.with_bins_per_day(self.units_per_day),
            Resolution::Hour => self.with_bins_per_day(HOURS_PER_DAY),
        }
    }

    pub fn with_bins_per_day(self, bins_per_day: usize) -> Result<Self, CurveError> {
        CycleParams {
            bins_per_day,
            ..self.params()
        }
        .build()
    }

    /// Time units covered by one bin.
    pub fn bin_width(&self) -> usize {
        self.units_per_day / self.bins_per_day
    }

    pub fn is_phase_positive(&self, day: usize) -> bool {
        let shifted = day as i64 - self.phase_offset as i64;
        shifted.rem_euclid(self.phase_cycle_length as i64) == 0
    }

    /// Phase-positive days in `1..=max_day`.
    pub fn phase_positive_days(&self, max_day: usize) -> Vec<usize> {
        (1..=max_day)
            .filter(|&day| self.is_phase_positive(day))
            .collect()
    }

    /// Number of complete days in `samples` samples; a partial trailing
    /// day is not counted.
    pub fn whole_days(&self, samples: usize) -> usize {
        samples / self.units_per_day
    }

    pub fn classify(&self, index: usize) -> BinIndex {
        let day = index / self.units_per_day + 1;
        let minute_of_day = index % self.units_per_day;
        BinIndex {
            day,
            minute_of_day,
            bin: minute_of_day / self.bin_width(),
            phase_positive: self.is_phase_positive(day),
        }
    }
}

/// Free-function form of [`CycleModel::classify`].
pub fn classify(index: usize, model: &CycleModel) -> BinIndex {
    model.classify(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CycleParams {
        CycleParams::default()
    }

    #[test]
    fn index_1500_lands_on_day_two() {
        let minute = classify(1500, &CycleModel::minute());
        assert_eq!(minute.day, 2);
        assert_eq!(minute.minute_of_day, 60);
        assert_eq!(minute.bin, 60);

        let hour = classify(1500, &CycleModel::hourly());
        assert_eq!(hour.day, 2);
        assert_eq!(hour.bin, 1);
    }

    #[test]
    fn estrus_days_follow_offset_and_cycle() {
        let model = CycleModel::default();
        assert_eq!(model.phase_positive_days(14), vec![2, 6, 10, 14]);
        for day in [1, 3, 4, 5, 7, 8, 9, 11, 12, 13] {
            assert!(!model.is_phase_positive(day), "day {day}");
        }
    }

    #[test]
    fn offset_beyond_day_uses_non_negative_modulo() {
        let model = CycleModel::new(1440, 1440, 4, 7).unwrap();
        // day 3: (3 - 7) mod 4 == 0
        assert!(model.is_phase_positive(3));
        assert!(!model.is_phase_positive(1));
    }

    #[test]
    fn first_and_last_index_of_a_day() {
        let model = CycleModel::hourly();
        let first = model.classify(0);
        assert_eq!((first.day, first.bin), (1, 0));
        let last = model.classify(1439);
        assert_eq!((last.day, last.minute_of_day, last.bin), (1, 1439, 23));
        assert_eq!(model.classify(1440).day, 2);
    }

    #[test]
    fn more_bins_than_units_is_rejected() {
        let err = CycleModel::new(12, 24, 4, 2).unwrap_err();
        assert!(matches!(err, CurveError::InvalidCycleModel(_)));
    }

    #[test]
    fn zero_units_per_day_is_rejected() {
        let zero_units = CycleParams {
            units_per_day: 0,
            ..params()
        };
        assert!(matches!(
            zero_units.build(),
            Err(CurveError::InvalidCycleModel(_))
        ));
    }

    #[test]
    fn zero_cycle_length_is_rejected() {
        assert!(matches!(
            CycleModel::new(1440, 24, 0, 2),
            Err(CurveError::InvalidCycleModel(_))
        ));
    }

    #[test]
    fn bins_must_divide_units() {
        assert!(CycleModel::default().with_bins_per_day(0).is_err());
        assert!(CycleModel::default().with_bins_per_day(7).is_err());
        assert_eq!(
            CycleModel::default().with_bins_per_day(24).unwrap(),
            CycleModel::hourly()
        );
    }

    #[test]
    fn deserialization_validates() {
        let model: CycleModel = serde_json::from_str(r#"{"bins_per_day": 24}"#).unwrap();
        assert_eq!(model, CycleModel::hourly());

        for bad in [
            r#"{"units_per_day": 12, "bins_per_day": 24}"#,
            r#"{"units_per_day": 0}"#,
            r#"{"phase_cycle_length": 0}"#,
        ] {
            assert!(serde_json::from_str::<CycleModel>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn whole_days_drop_partial_day() {
        let model = CycleModel::default();
        assert_eq!(model.whole_days(0), 0);
        assert_eq!(model.whole_days(1439), 0);
        assert_eq!(model.whole_days(1440), 1);
        assert_eq!(model.whole_days(1440 + 60), 1);
    }

    #[test]
    fn resolution_maps_to_bins() {
        assert_eq!(
            CycleModel::default().with_resolution(Resolution::Hour).unwrap(),
            CycleModel::hourly()
        );
        assert_eq!(CycleModel::hourly().bin_width(), 60);
        let five_minute = CycleModel::new(288, 24, 4, 2).unwrap();
        assert_eq!(
            five_minute
                .with_resolution(Resolution::Minute)
                .unwrap()
                .bins_per_day(),
            288
        );
        let short_day = CycleModel::new(4, 4, 4, 2).unwrap();
        assert!(short_day.with_resolution(Resolution::Hour).is_err());
    }
}
