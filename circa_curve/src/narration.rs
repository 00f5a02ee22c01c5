//! Day-by-day narration steps and chart view state.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::cycle::CycleModel;
use crate::Curve;

/// One narration step: a day and its caption.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayStep {
    pub day: usize,
    pub phase_positive: bool,
    pub title: String,
}

pub fn day_title(model: &CycleModel, day: usize) -> String {
    if model.is_phase_positive(day) {
        format!("Day {}: Estrus Phase - Elevated Temperature", day)
    } else {
        format!("Day {}: Regular Patterns", day)
    }
}

/// Steps for days `1..=days`, classified by `model`.
pub fn day_steps(model: &CycleModel, days: usize) -> Vec<DayStep> {
    (1..=days)
        .map(|day| DayStep {
            day,
            phase_positive: model.is_phase_positive(day),
            title: day_title(model, day),
        })
        .collect()
}

/// Wall-clock start of `bin` as `HH:MM`.
pub fn format_bin_time(bin: usize, model: &CycleModel) -> String {
    let units = bin * model.bin_width();
    let seconds = units as u64 * 86_400 / model.units_per_day() as u64;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "24:00".to_string())
}

/// Focused day and visible bin window of one chart.
///
/// Values are immutable; every transition returns a new state clamped to
/// the chart's days and bins.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewState {
    day: usize,
    max_day: usize,
    bins: usize,
    start: usize,
    end: usize,
}

impl ViewState {
    pub fn new(max_day: usize, bins: usize) -> Self {
        Self {
            day: 1,
            max_day: max_day.max(1),
            bins,
            start: 0,
            end: bins,
        }
    }

    pub fn day(&self) -> usize {
        self.day
    }

    /// Half-open visible bin range.
    pub fn window(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    pub fn with_day(self, day: usize) -> Self {
        Self {
            day: day.clamp(1, self.max_day),
            ..self
        }
    }

    /// Select the day shown by narration step `index` (0-based).
    pub fn with_step(self, index: usize) -> Self {
        self.with_day(index + 1)
    }

    /// Narrow (`factor > 1`) or widen the window around `center`.
    pub fn zoom(self, factor: f64, center: usize) -> Self {
        if self.bins == 0 || !factor.is_finite() || factor <= 0.0 {
            return self;
        }
        let width = (self.end - self.start) as f64;
        let new_width = ((width / factor).round() as usize).clamp(1, self.bins);
        let center = center.min(self.bins - 1);
        let start = center.saturating_sub(new_width / 2);
        let start = start.min(self.bins - new_width);
        Self {
            start,
            end: start + new_width,
            ..self
        }
    }

    /// Shift the window by `delta` bins without changing its width.
    pub fn pan(self, delta: isize) -> Self {
        let width = self.end - self.start;
        let max_start = self.bins - width;
        let start = (self.start as isize + delta).clamp(0, max_start as isize) as usize;
        Self {
            start,
            end: start + width,
            ..self
        }
    }

    pub fn reset(self) -> Self {
        Self {
            start: 0,
            end: self.bins,
            ..self
        }
    }

    pub fn step(&self, model: &CycleModel) -> DayStep {
        DayStep {
            day: self.day,
            phase_positive: model.is_phase_positive(self.day),
            title: day_title(model, self.day),
        }
    }

    /// The part of `curve` inside the window.
    pub fn visible<'c>(&self, curve: &'c Curve) -> &'c [f64] {
        let values = curve.values();
        let end = self.end.min(values.len());
        let start = self.start.min(end);
        &values[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_follow_classifier() {
        let steps = day_steps(&CycleModel::default(), 14);
        assert_eq!(steps.len(), 14);
        let estrus: Vec<usize> = steps
            .iter()
            .filter(|s| s.phase_positive)
            .map(|s| s.day)
            .collect();
        assert_eq!(estrus, vec![2, 6, 10, 14]);
        assert_eq!(steps[5].title, "Day 6: Estrus Phase - Elevated Temperature");
        assert_eq!(steps[6].title, "Day 7: Regular Patterns");
    }

    #[test]
    fn bin_times() {
        assert_eq!(format_bin_time(0, &CycleModel::minute()), "00:00");
        assert_eq!(format_bin_time(125, &CycleModel::minute()), "02:05");
        assert_eq!(format_bin_time(23, &CycleModel::hourly()), "23:00");
    }

    #[test]
    fn day_selection_clamps() {
        let view = ViewState::new(14, 24);
        assert_eq!(view.with_day(0).day(), 1);
        assert_eq!(view.with_day(99).day(), 14);
        assert_eq!(view.with_step(5).day(), 6);
    }

    #[test]
    fn zoom_and_pan_stay_in_bounds() {
        let view = ViewState::new(1, 1440).zoom(4.0, 720);
        assert_eq!(view.window(), (540, 900));
        let panned = view.pan(10_000);
        assert_eq!(panned.window(), (1080, 1440));
        let back = panned.pan(-100_000);
        assert_eq!(back.window(), (0, 360));
        assert_eq!(back.reset().window(), (0, 1440));
        let edge = ViewState::new(1, 1440).zoom(2.0, 0);
        assert_eq!(edge.window(), (0, 720));
    }

    #[test]
    fn views_are_independent() {
        let a = ViewState::new(14, 24);
        let b = a.with_day(3).zoom(2.0, 12);
        assert_eq!(a.day(), 1);
        assert_eq!(a.window(), (0, 24));
        assert_eq!(b.day(), 3);
        assert_eq!(b.window(), (6, 18));
    }

    #[test]
    fn visible_slices_curve() {
        let curve = Curve::from((0..24).map(f64::from).collect::<Vec<_>>());
        let view = ViewState::new(1, 24).zoom(4.0, 12);
        assert_eq!(view.visible(&curve), &[9.0, 10.0, 11.0, 12.0, 13.0, 14.0]);
        let step = view.with_day(2).step(&CycleModel::hourly());
        assert!(step.phase_positive);
    }
}
