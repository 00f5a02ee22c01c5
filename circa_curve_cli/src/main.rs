use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use circa_curve::{
    aggregate, build_daily_hourly_curve, day_steps, format_bin_time, load_workbook,
    read_sheet_csv, AggregationRequest, Curve, CycleModel, DailyCurves, DayRange, DayStep,
    GroupCurve, Measure, PhaseFilter, Pooling, RawSeries, Resolution, SheetKind,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod plot;

use config::Config;
use plot::{
    render_chart_guard, ChartGroup, ChartKind, ChartSpec, FEMALE_ESTRUS_COLOR,
    FEMALE_NON_ESTRUS_COLOR, MALE_COLOR,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Circadian activity/temperature curve CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Average curves by time of day: male, female non-estrus, female estrus
    Curve(CurveArgs),
    /// Hourly curves for each recorded day, all four sheets
    Daily(DailyArgs),
    /// List days with their estrus classification and narration title
    Phases(PhasesArgs),
}

/// Cycle model and aggregation overrides shared by every subcommand.
#[derive(Args, Debug, Default)]
struct CycleArgs {
    /// TOML configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Samples per day
    #[arg(long)]
    units_per_day: Option<usize>,

    /// Bins per day (must divide units per day)
    #[arg(long)]
    bins_per_day: Option<usize>,

    /// Days per estrus cycle
    #[arg(long)]
    cycle_length: Option<usize>,

    /// Day number anchoring the estrus cycle
    #[arg(long)]
    phase_offset: Option<usize>,

    /// Group combination policy
    #[arg(long, value_enum)]
    pooling: Option<PoolingOpt>,
}

#[derive(Parser, Debug)]
struct CurveArgs {
    /// Workbook (.xlsx) or directory of sheet CSVs (male_act.csv, fem_act.csv, ...)
    #[arg(value_hint = ValueHint::AnyPath)]
    input: PathBuf,

    /// Measure to average
    #[arg(long, value_enum, default_value_t = MeasureOpt::Activity)]
    measure: MeasureOpt,

    /// Bin resolution (overrides the configured bins per day)
    #[arg(long, value_enum)]
    resolution: Option<ResolutionOpt>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "curve.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatOpt::Csv)]
    format: FormatOpt,

    /// Include one column (or JSON entry) per subject
    #[arg(long, action = ArgAction::SetTrue)]
    members: bool,

    /// Output PNG figure path (defaults next to the output)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    #[command(flatten)]
    cycle: CycleArgs,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct DailyArgs {
    /// Workbook (.xlsx) or directory of sheet CSVs
    #[arg(value_hint = ValueHint::AnyPath)]
    input: PathBuf,

    /// Last day to materialize
    #[arg(long)]
    max_day: Option<usize>,

    /// Only emit this day; days past the recording read as zero
    #[arg(long)]
    day: Option<usize>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "daily.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatOpt::Csv)]
    format: FormatOpt,

    #[command(flatten)]
    cycle: CycleArgs,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct PhasesArgs {
    /// Number of days to list (defaults to the configured max day)
    #[arg(long)]
    days: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatOpt::Csv)]
    format: FormatOpt,

    #[command(flatten)]
    cycle: CycleArgs,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MeasureOpt {
    Activity,
    Temperature,
}

impl From<MeasureOpt> for Measure {
    fn from(value: MeasureOpt) -> Self {
        match value {
            MeasureOpt::Activity => Measure::Activity,
            MeasureOpt::Temperature => Measure::Temperature,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ResolutionOpt {
    Minute,
    Hour,
}

impl From<ResolutionOpt> for Resolution {
    fn from(value: ResolutionOpt) -> Self {
        match value {
            ResolutionOpt::Minute => Resolution::Minute,
            ResolutionOpt::Hour => Resolution::Hour,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PoolingOpt {
    PerSubject,
    Pooled,
}

impl From<PoolingOpt> for Pooling {
    fn from(value: PoolingOpt) -> Self {
        match value {
            PoolingOpt::PerSubject => Pooling::PerSubject,
            PoolingOpt::Pooled => Pooling::Pooled,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatOpt {
    Csv,
    Json,
}

impl CycleArgs {
    /// Defaults, then the config file, then flags.
    fn resolve(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())?;
        let mut cycle = config.cycle.params();
        if let Some(units) = self.units_per_day {
            cycle.units_per_day = units;
            if self.bins_per_day.is_none() && units % cycle.bins_per_day != 0 {
                // one bin per unit
                cycle.bins_per_day = units;
            }
        }
        if let Some(bins) = self.bins_per_day {
            cycle.bins_per_day = bins;
        }
        if let Some(length) = self.cycle_length {
            cycle.phase_cycle_length = length;
        }
        if let Some(offset) = self.phase_offset {
            cycle.phase_offset = offset;
        }
        if let Some(pooling) = self.pooling {
            config.aggregation.pooling = pooling.into();
        }
        config.cycle = cycle
            .build()
            .context("invalid cycle model after applying flags")?;
        debug!(?config, "resolved configuration");
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Curve(args) => args.verbose,
        Command::Daily(args) => args.verbose,
        Command::Phases(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Curve(args) => handle_curve(args),
        Command::Daily(args) => handle_daily(args),
        Command::Phases(args) => handle_phases(args),
    }
}

/// Load `kinds` from a workbook or from `<stem>.csv` files in a directory.
fn load_sheets(input: &Path, kinds: &[SheetKind]) -> Result<BTreeMap<SheetKind, RawSeries>> {
    if input.is_dir() {
        let sheets = kinds
            .par_iter()
            .map(|&kind| -> Result<(SheetKind, RawSeries)> {
                let path = input.join(format!("{}.csv", kind.file_stem()));
                let series = read_sheet_csv(&path, kind)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Ok((kind, series))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(sheets.into_iter().collect());
    }

    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" => load_workbook(input, kinds)
            .with_context(|| format!("failed to load workbook {}", input.display())),
        _ => Err(anyhow!(
            "{} is neither a directory of CSV sheets nor an .xlsx workbook",
            input.display()
        )),
    }
}

fn take_sheet(
    sheets: &mut BTreeMap<SheetKind, RawSeries>,
    kind: SheetKind,
) -> Result<RawSeries> {
    sheets
        .remove(&kind)
        .ok_or_else(|| anyhow!("sheet {} was not loaded", kind.sheet_name()))
}

fn log_stage(enabled: bool, stage: &str, started: Instant) {
    if enabled {
        info!(
            "{} stage: {:.1} ms",
            stage,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// The three curves charted for one measure.
#[derive(Debug, Serialize)]
struct CurveReport {
    measure: Measure,
    model: CycleModel,
    pooling: Pooling,
    male: GroupCurve,
    female_non_estrus: GroupCurve,
    female_estrus: GroupCurve,
}

impl CurveReport {
    fn groups(&self) -> [(&'static str, &GroupCurve); 3] {
        [
            ("male", &self.male),
            ("female_non_estrus", &self.female_non_estrus),
            ("female_estrus", &self.female_estrus),
        ]
    }
}

fn build_report(
    male: &RawSeries,
    female: &RawSeries,
    measure: Measure,
    model: CycleModel,
    pooling: Pooling,
) -> Result<CurveReport> {
    let males = AggregationRequest::all_subjects(male).with_pooling(pooling);
    let females = AggregationRequest::all_subjects(female).with_pooling(pooling);
    Ok(CurveReport {
        measure,
        model,
        pooling,
        male: aggregate(male, &model, &males).context("male group")?,
        female_non_estrus: aggregate(
            female,
            &model,
            &females.clone().with_filter(PhaseFilter::NegativeOnly),
        )
        .context("female non-estrus group")?,
        female_estrus: aggregate(
            female,
            &model,
            &females.with_filter(PhaseFilter::PositiveOnly),
        )
        .context("female estrus group")?,
    })
}

fn handle_curve(args: CurveArgs) -> Result<()> {
    let config = args.cycle.resolve()?;
    let mut model = config.cycle;
    if let Some(resolution) = args.resolution {
        model = model
            .with_resolution(resolution.into())
            .context("resolution does not fit the configured day length")?;
    }
    let measure: Measure = args.measure.into();
    let (male_kind, female_kind) = measure.sheets();

    let t_parse = Instant::now();
    let mut sheets = load_sheets(&args.input, &[male_kind, female_kind])?;
    let male = take_sheet(&mut sheets, male_kind)?;
    let female = take_sheet(&mut sheets, female_kind)?;
    log_stage(args.profile || args.verbose, "Parse", t_parse);
    info!(
        "Loaded {}: {} male and {} female subjects, {} samples",
        measure.label(),
        male.subjects().len(),
        female.subjects().len(),
        male.len().max(female.len())
    );

    let t_compute = Instant::now();
    let report = build_report(&male, &female, measure, model, config.aggregation.pooling)?;
    log_stage(args.profile || args.verbose, "Compute", t_compute);
    info!(
        "Curves computed: {} bins per day, pooling {:?}",
        model.bins_per_day(), report.pooling
    );

    let t_write = Instant::now();
    let mut out = open_output(&args.output)?;
    match args.format {
        FormatOpt::Csv => write_curve_rows(&report, args.members, &mut out)?,
        FormatOpt::Json => write_json(&report, args.members, &mut out)?,
    }
    out.flush()?;
    drop(out);
    log_stage(args.profile || args.verbose, "Write", t_write);
    if args.output.as_os_str() != "-" {
        info!("Wrote curves: {}", args.output.display());
    }

    if !args.no_plot {
        let spec = chart_spec(&report, args.members);
        let mut targets: Vec<(PathBuf, ChartKind)> = Vec::new();
        if let Some(path) = args.png.as_ref() {
            targets.push((path.clone(), ChartKind::Png));
        } else if args.output.as_os_str() != "-" {
            let mut png_path = args.output.clone();
            png_path.set_extension("png");
            targets.push((png_path, ChartKind::Png));
        }
        if let Some(path) = args.svg.as_ref() {
            let kind = ChartKind::from_path(path).unwrap_or(ChartKind::Svg);
            targets.push((path.clone(), kind));
        }

        for (path, kind) in targets {
            let t_plot = Instant::now();
            if let Err(err) = render_chart_guard(&spec, &path, kind) {
                warn!("Skipping plot ({}): {}", path.display(), err);
            } else {
                info!("Wrote plot: {}", path.display());
            }
            log_stage(args.profile || args.verbose, "Plot", t_plot);
        }
    }

    Ok(())
}

fn member_curves(group: &GroupCurve) -> Vec<&Curve> {
    group.members.iter().map(|m| &m.curve).collect()
}

fn chart_spec(report: &CurveReport, show_members: bool) -> ChartSpec<'_> {
    let label = report.measure.label();
    ChartSpec {
        title: format!("Average {} by Time of Day", label),
        y_label: label,
        model: report.model,
        groups: vec![
            ChartGroup {
                label: "Male (avg)",
                color: MALE_COLOR,
                mean: &report.male.mean,
                members: member_curves(&report.male),
            },
            ChartGroup {
                label: "Female non-estrus (avg)",
                color: FEMALE_NON_ESTRUS_COLOR,
                mean: &report.female_non_estrus.mean,
                members: member_curves(&report.female_non_estrus),
            },
            ChartGroup {
                label: "Female estrus (avg)",
                color: FEMALE_ESTRUS_COLOR,
                mean: &report.female_estrus.mean,
                members: member_curves(&report.female_estrus),
            },
        ],
        show_members,
    }
}

fn format_value(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "".into())
}

/// One row per bin: `bin,time,male,female_non_estrus,female_estrus`, then
/// `<group>:<subject>` columns when `members` is set.
fn write_curve_rows<W: Write>(report: &CurveReport, members: bool, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let groups = report.groups();

    let mut header = vec!["bin".to_string(), "time".to_string()];
    header.extend(groups.iter().map(|(name, _)| name.to_string()));
    if members {
        for (name, group) in &groups {
            header.extend(
                group
                    .members
                    .iter()
                    .map(|m| format!("{}:{}", name, m.subject)),
            );
        }
    }
    writer.write_record(&header)?;

    for bin in 0..report.model.bins_per_day() {
        let mut row = vec![bin.to_string(), format_bin_time(bin, &report.model)];
        row.extend(groups.iter().map(|(_, g)| format_value(g.mean.get(bin))));
        if members {
            for (_, group) in &groups {
                row.extend(group.members.iter().map(|m| format_value(m.curve.get(bin))));
            }
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_json<W: Write, T: Serialize>(value: &T, members: bool, mut out: W) -> Result<()> {
    let mut json = serde_json::to_value(value)?;
    if !members {
        strip_members(&mut json);
    }
    serde_json::to_writer_pretty(&mut out, &json)?;
    writeln!(out)?;
    Ok(())
}

fn strip_members(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.remove("members");
            map.values_mut().for_each(strip_members);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_members),
        _ => {}
    }
}

#[derive(Debug, Serialize)]
struct DailyReport {
    model: CycleModel,
    pooling: Pooling,
    days: Vec<DailyDay>,
}

#[derive(Debug, Serialize)]
struct DailyDay {
    #[serde(flatten)]
    step: DayStep,
    male_activity: Curve,
    female_activity: Curve,
    male_temperature: Curve,
    female_temperature: Curve,
}

fn handle_daily(args: DailyArgs) -> Result<()> {
    let config = args.cycle.resolve()?;
    let model = config
        .cycle
        .with_resolution(Resolution::Hour)
        .context("hourly bins do not fit the configured day length")?;
    let pooling = config.aggregation.pooling;
    let range = DayRange {
        max_day: args.max_day.unwrap_or(config.aggregation.max_day),
    };

    let t_parse = Instant::now();
    let sheets = load_sheets(&args.input, &SheetKind::ALL)?;
    log_stage(args.profile || args.verbose, "Parse", t_parse);

    let t_compute = Instant::now();
    let daily = sheets
        .par_iter()
        .map(|(&kind, series)| -> Result<(SheetKind, DailyCurves)> {
            let curves =
                build_daily_hourly_curve(series, series.subjects(), &model, range, pooling)
                    .with_context(|| format!("daily curves for {}", kind.sheet_name()))?;
            Ok((kind, curves))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    log_stage(args.profile || args.verbose, "Compute", t_compute);

    let last_day = daily.values().map(DailyCurves::len).max().unwrap_or(0);
    if last_day == 0 {
        bail!("no complete day of samples in {}", args.input.display());
    }
    let days = select_days(args.day, last_day)?;
    info!(
        "Daily curves: {} days, {} bins per day, pooling {:?}",
        last_day, model.bins_per_day(), pooling
    );

    let report = daily_report(&daily, &model, pooling, &days)?;
    let mut out = open_output(&args.output)?;
    match args.format {
        FormatOpt::Csv => write_daily_rows(&report, &mut out)?,
        FormatOpt::Json => write_json(&report, true, &mut out)?,
    }
    out.flush()?;
    if args.output.as_os_str() != "-" {
        info!("Wrote daily curves: {}", args.output.display());
    }
    Ok(())
}

/// Days to emit: every materialized day, or the one requested. A requested
/// day past `last_day` reads as zero curves.
fn select_days(day: Option<usize>, last_day: usize) -> Result<Vec<usize>> {
    match day {
        Some(0) => bail!("days are numbered from 1"),
        Some(day) => {
            if day > last_day {
                warn!(
                    "Day {} is past the last complete day {}; its curves are zero",
                    day, last_day
                );
            }
            Ok(vec![day])
        }
        None => Ok((1..=last_day).collect()),
    }
}

fn daily_report(
    daily: &BTreeMap<SheetKind, DailyCurves>,
    model: &CycleModel,
    pooling: Pooling,
    days: &[usize],
) -> Result<DailyReport> {
    let day_curve = |kind: SheetKind, day: usize| -> Result<Curve> {
        daily
            .get(&kind)
            .map(|curves| curves.day(day))
            .ok_or_else(|| anyhow!("no daily curves for {}", kind.sheet_name()))
    };
    let steps = day_steps(model, days.iter().copied().max().unwrap_or(0));
    let days = days
        .iter()
        .map(|&day| -> Result<DailyDay> {
            Ok(DailyDay {
                step: steps[day - 1].clone(),
                male_activity: day_curve(SheetKind::MaleActivity, day)?,
                female_activity: day_curve(SheetKind::FemaleActivity, day)?,
                male_temperature: day_curve(SheetKind::MaleTemperature, day)?,
                female_temperature: day_curve(SheetKind::FemaleTemperature, day)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DailyReport {
        model: *model,
        pooling,
        days,
    })
}

fn write_daily_rows<W: Write>(report: &DailyReport, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "day",
        "hour",
        "time",
        "estrus",
        "male_activity",
        "male_temperature",
        "female_activity",
        "female_temperature",
    ])?;
    for day in &report.days {
        for bin in 0..report.model.bins_per_day() {
            writer.write_record([
                day.step.day.to_string(),
                bin.to_string(),
                format_bin_time(bin, &report.model),
                day.step.phase_positive.to_string(),
                format_value(day.male_activity.get(bin)),
                format_value(day.male_temperature.get(bin)),
                format_value(day.female_activity.get(bin)),
                format_value(day.female_temperature.get(bin)),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn handle_phases(args: PhasesArgs) -> Result<()> {
    let config = args.cycle.resolve()?;
    let days = args.days.unwrap_or(config.aggregation.max_day);
    let steps = day_steps(&config.cycle, days);
    let stdout = io::stdout();
    let handle = stdout.lock();
    match args.format {
        FormatOpt::Csv => write_phase_rows(&steps, handle),
        FormatOpt::Json => write_json(&steps, true, handle),
    }
}

fn write_phase_rows<W: Write>(steps: &[DayStep], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["day", "estrus", "title"])?;
    for step in steps {
        writer.write_record([
            step.day.to_string(),
            step.phase_positive.to_string(),
            step.title.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
