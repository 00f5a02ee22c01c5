use std::panic;
use std::path::Path;

use anyhow::Result;
use circa_curve::{format_bin_time, Curve, CycleModel};
use plotters::coord::Shift;
use plotters::prelude::*;

pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => Some(ChartKind::Png),
            Some("svg") => Some(ChartKind::Svg),
            _ => None,
        }
    }
}

/// One labelled group line plus its faint member lines.
pub struct ChartGroup<'a> {
    pub label: &'a str,
    pub color: RGBColor,
    pub mean: &'a Curve,
    pub members: Vec<&'a Curve>,
}

pub struct ChartSpec<'a> {
    pub title: String,
    pub y_label: &'a str,
    pub model: CycleModel,
    pub groups: Vec<ChartGroup<'a>>,
    pub show_members: bool,
}

pub const MALE_COLOR: RGBColor = RGBColor(173, 216, 230);
pub const FEMALE_NON_ESTRUS_COLOR: RGBColor = RGBColor(255, 182, 193);
pub const FEMALE_ESTRUS_COLOR: RGBColor = RGBColor(217, 61, 95);

const SIZE: (u32, u32) = (1280, 720);

/// Render `spec`, turning backend panics into errors.
pub fn render_chart_guard(spec: &ChartSpec, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<(), String> {
        match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, SIZE).into_drawing_area();
                draw_curves(root, spec).map_err(|e| format!("plotting error: {}", e))
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, SIZE).into_drawing_area();
                draw_curves(root, spec).map_err(|e| format!("plotting error: {}", e))
            }
        }
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn y_bounds(spec: &ChartSpec) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for group in &spec.groups {
        let mut curves = vec![group.mean];
        if spec.show_members {
            curves.extend(group.members.iter().copied());
        }
        for curve in curves {
            if let (Some(min), Some(max)) = (curve.min(), curve.max()) {
                lo = lo.min(min);
                hi = hi.max(max);
            }
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad, hi + pad)
}

fn draw_curves<DB>(root: DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let model = spec.model;
    let bins = model.bins_per_day();
    let x_max = (bins - 1).max(1) as f64;
    let half = bins as f64 / 2.0;
    let (y_min, y_max) = y_bounds(spec);

    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(25)
        .caption(&spec.title, ("sans-serif", 26))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Time of Day")
        .y_desc(spec.y_label)
        .x_labels(12)
        .x_label_formatter(&|v| format_bin_time(v.max(0.0).round() as usize, &model))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .draw()?;

    // dark half then light half of the day
    chart.draw_series(std::iter::once(Rectangle::new(
        [(0.0, y_min), (half, y_max)],
        BLACK.mix(0.05).filled(),
    )))?;
    chart.draw_series(std::iter::once(Rectangle::new(
        [(half, y_min), (x_max, y_max)],
        RGBColor(255, 255, 200).mix(0.2).filled(),
    )))?;

    if spec.show_members {
        for group in &spec.groups {
            let faint = group.color.mix(0.35);
            for member in &group.members {
                chart.draw_series(LineSeries::new(
                    member
                        .values()
                        .iter()
                        .enumerate()
                        .map(|(bin, &v)| (bin as f64, v)),
                    &faint,
                ))?;
            }
        }
    }

    for group in &spec.groups {
        let color = group.color;
        chart
            .draw_series(LineSeries::new(
                group
                    .mean
                    .values()
                    .iter()
                    .enumerate()
                    .map(|(bin, &v)| (bin as f64, v)),
                color.stroke_width(2),
            ))?
            .label(group.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}
