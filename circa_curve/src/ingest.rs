//! Sheet parsing into [`RawSeries`].
//!
//! A sheet is a grid whose first row names the subjects (the first header
//! cell labels the time column and is ignored) and whose following rows are
//! consecutive time steps. The first cell of each data row is ignored too.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::series::RawSeries;
use crate::CurveError;

/// The four logical sheets of a recording workbook.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SheetKind {
    MaleActivity,
    FemaleActivity,
    MaleTemperature,
    FemaleTemperature,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    Activity,
    Temperature,
}

impl Measure {
    pub fn label(self) -> &'static str {
        match self {
            Measure::Activity => "Activity",
            Measure::Temperature => "Temperature",
        }
    }

    /// Male and female sheets holding this measure.
    pub fn sheets(self) -> (SheetKind, SheetKind) {
        match self {
            Measure::Activity => (SheetKind::MaleActivity, SheetKind::FemaleActivity),
            Measure::Temperature => (SheetKind::MaleTemperature, SheetKind::FemaleTemperature),
        }
    }
}

impl SheetKind {
    pub const ALL: [SheetKind; 4] = [
        SheetKind::MaleActivity,
        SheetKind::FemaleActivity,
        SheetKind::MaleTemperature,
        SheetKind::FemaleTemperature,
    ];

    /// Worksheet title inside the workbook.
    pub fn sheet_name(self) -> &'static str {
        match self {
            SheetKind::MaleActivity => "Male Act",
            SheetKind::FemaleActivity => "Fem Act",
            SheetKind::MaleTemperature => "Male Temp",
            SheetKind::FemaleTemperature => "Fem Temp",
        }
    }

    /// File stem used when sheets are stored as separate CSV files.
    pub fn file_stem(self) -> &'static str {
        match self {
            SheetKind::MaleActivity => "male_act",
            SheetKind::FemaleActivity => "fem_act",
            SheetKind::MaleTemperature => "male_temp",
            SheetKind::FemaleTemperature => "fem_temp",
        }
    }

    pub fn measure(self) -> Measure {
        match self {
            SheetKind::MaleActivity | SheetKind::FemaleActivity => Measure::Activity,
            SheetKind::MaleTemperature | SheetKind::FemaleTemperature => Measure::Temperature,
        }
    }

    pub fn is_female(self) -> bool {
        matches!(
            self,
            SheetKind::FemaleActivity | SheetKind::FemaleTemperature
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Cell {
    Blank,
    Number(f64),
    Text(String),
}

impl Cell {
    fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Blank
        } else if let Ok(value) = trimmed.parse::<f64>() {
            Cell::Number(value)
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Cell::Blank)
    }
}

/// Collects header and rows, checking shape and values as they arrive.
struct SheetBuilder<'a> {
    sheet: &'a str,
    subjects: Vec<String>,
    rows: Vec<Vec<f64>>,
    blank_since: Option<usize>,
}

impl<'a> SheetBuilder<'a> {
    fn new(sheet: &'a str, header: Vec<Cell>) -> Result<Self, CurveError> {
        let mut subjects = Vec::with_capacity(header.len().saturating_sub(1));
        for (col, cell) in header.into_iter().enumerate().skip(1) {
            let id = match cell {
                Cell::Text(text) => text,
                Cell::Number(value) => value.to_string(),
                Cell::Blank => {
                    return Err(CurveError::SheetParse(format!(
                        "{}: header column {} has no subject id",
                        sheet,
                        col + 1
                    )))
                }
            };
            if subjects.contains(&id) {
                return Err(CurveError::DuplicateSubject(id));
            }
            subjects.push(id);
        }
        if subjects.is_empty() {
            return Err(CurveError::SheetParse(format!(
                "{}: header lists no subjects",
                sheet
            )));
        }
        Ok(Self {
            sheet,
            subjects,
            rows: Vec::new(),
            blank_since: None,
        })
    }

    /// `line` is the 1-based sheet row, for messages.
    fn push(&mut self, line: usize, cells: Vec<Cell>) -> Result<(), CurveError> {
        if cells.iter().all(Cell::is_blank) {
            self.blank_since.get_or_insert(line);
            return Ok(());
        }
        if let Some(blank) = self.blank_since {
            return Err(CurveError::SheetParse(format!(
                "{}: blank row {} inside data",
                self.sheet, blank
            )));
        }
        let expected = self.subjects.len() + 1;
        let trailing_blank = cells.iter().skip(expected).all(Cell::is_blank);
        if cells.len() < expected || !trailing_blank {
            return Err(CurveError::SheetParse(format!(
                "{}: row {} has {} cells, expected {}",
                self.sheet,
                line,
                cells.len(),
                expected
            )));
        }
        let mut row = Vec::with_capacity(self.subjects.len());
        for (col, cell) in cells.into_iter().enumerate().skip(1).take(self.subjects.len()) {
            match cell {
                Cell::Number(value) if value.is_finite() => row.push(value),
                other => {
                    return Err(CurveError::SheetParse(format!(
                        "{}: row {} column {} ({}) is not a finite number: {:?}",
                        self.sheet,
                        line,
                        col + 1,
                        self.subjects[col - 1],
                        other
                    )))
                }
            }
        }
        self.rows.push(row);
        Ok(())
    }

    fn finish(self) -> Result<RawSeries, CurveError> {
        if let Some(line) = self.blank_since {
            warn!(sheet = self.sheet, from_row = line, "ignoring trailing blank rows");
        }
        RawSeries::new(self.subjects, self.rows)
    }
}

/// Parse one sheet stored as CSV.
pub fn parse_sheet_csv(input: &[u8]) -> Result<RawSeries, CurveError> {
    parse_csv_named(input, "csv")
}

fn parse_csv_named(input: &[u8], sheet: &str) -> Result<RawSeries, CurveError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record.map_err(|e| CurveError::SheetParse(e.to_string()))?,
        None => {
            return Err(CurveError::SheetParse(format!(
                "{}: sheet has no header row",
                sheet
            )))
        }
    };
    // ids are kept verbatim, numeric-looking or not
    let header_cells = header
        .iter()
        .map(|raw| match raw.trim() {
            "" => Cell::Blank,
            id => Cell::Text(id.to_string()),
        })
        .collect();
    let mut builder = SheetBuilder::new(sheet, header_cells)?;

    for (offset, record) in records.enumerate() {
        let record = record.map_err(|e| CurveError::SheetParse(e.to_string()))?;
        let cells = record.iter().map(Cell::from_text).collect();
        builder.push(offset + 2, cells)?;
    }
    builder.finish()
}

/// Parse `kind` from `input`, dispatching on a file extension or format hint.
pub fn parse_sheet(input: &[u8], format: &str, kind: SheetKind) -> Result<RawSeries, CurveError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with("csv") {
        parse_csv_named(input, kind.sheet_name())
    } else if format_lc.ends_with("xlsx") || format_lc.ends_with("xlsm") {
        #[cfg(feature = "xlsx")]
        {
            let mut sheets = parse_workbook(input, &[kind])?;
            sheets
                .remove(&kind)
                .ok_or_else(|| CurveError::MissingSheet(kind.sheet_name().to_string()))
        }
        #[cfg(not(feature = "xlsx"))]
        {
            Err(CurveError::UnsupportedFormat(format.to_string()))
        }
    } else {
        Err(CurveError::UnsupportedFormat(format.to_string()))
    }
}

/// Read one CSV sheet from disk.
pub fn read_sheet_csv(path: &Path, kind: SheetKind) -> Result<RawSeries, CurveError> {
    let data = fs::read(path)?;
    parse_csv_named(&data, kind.sheet_name())
}

/// Parse the requested sheets from XLSX bytes.
#[cfg(feature = "xlsx")]
pub fn parse_workbook(
    input: &[u8],
    kinds: &[SheetKind],
) -> Result<BTreeMap<SheetKind, RawSeries>, CurveError> {
    use calamine::{Data, Reader, Xlsx};
    use std::io::Cursor;

    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(input)).map_err(|e| CurveError::SheetParse(e.to_string()))?;
    let names = workbook.sheet_names();

    let mut out = BTreeMap::new();
    for &kind in kinds {
        let name = kind.sheet_name();
        if !names.iter().any(|n| n == name) {
            return Err(CurveError::MissingSheet(name.to_string()));
        }
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| CurveError::SheetParse(format!("{}: {}", name, e)))?;
        let to_cell = |data: &Data| match data {
            Data::Empty => Cell::Blank,
            Data::Float(v) => Cell::Number(*v),
            Data::Int(v) => Cell::Number(*v as f64),
            Data::String(s) => Cell::from_text(s),
            other => Cell::Text(other.to_string()),
        };

        let mut rows = range.rows();
        let header = match rows.next() {
            Some(cells) => cells
                .iter()
                .map(|data| match data {
                    Data::String(s) if !s.trim().is_empty() => Cell::Text(s.trim().to_string()),
                    Data::Empty => Cell::Blank,
                    Data::String(_) => Cell::Blank,
                    other => Cell::Text(other.to_string()),
                })
                .collect(),
            None => {
                return Err(CurveError::SheetParse(format!(
                    "{}: sheet has no header row",
                    name
                )))
            }
        };
        let mut builder = SheetBuilder::new(name, header)?;
        for (offset, cells) in rows.enumerate() {
            builder.push(offset + 2, cells.iter().map(to_cell).collect())?;
        }
        out.insert(kind, builder.finish()?);
    }
    Ok(out)
}

/// Load the requested sheets from an XLSX workbook on disk.
#[cfg(feature = "xlsx")]
pub fn load_workbook(
    path: &Path,
    kinds: &[SheetKind],
) -> Result<BTreeMap<SheetKind, RawSeries>, CurveError> {
    let data = fs::read(path)?;
    parse_workbook(&data, kinds)
}

/// Load one sheet from an XLSX workbook on disk.
#[cfg(feature = "xlsx")]
pub fn read_workbook_sheet(path: &Path, kind: SheetKind) -> Result<RawSeries, CurveError> {
    let mut sheets = load_workbook(path, &[kind])?;
    sheets
        .remove(&kind)
        .ok_or_else(|| CurveError::MissingSheet(kind.sheet_name().to_string()))
}
