//! Typed tabular files.
//!
//! Every table is a CSV with a header row followed by a type row declaring
//! each column's logical type. Loading checks both rows against the schema and
//! every cell against its declared type, so a reload never silently coerces
//! (large ids stay strings, blanks stay blanks).

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use tally_common::{TallyError, TweetId};

use crate::files::write_atomic;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Float,
    Datetime,
    Bool,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Datetime => "datetime",
            ColumnType::Bool => "bool",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(ColumnType::String),
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "datetime" => Some(ColumnType::Datetime),
            "bool" => Some(ColumnType::Bool),
            _ => None,
        }
    }

    /// Check a non-empty cell against the type. Blank cells are always valid.
    fn check(&self, cell: &str) -> std::result::Result<(), String> {
        if cell.is_empty() {
            return Ok(());
        }
        let ok = match self {
            ColumnType::String => true,
            ColumnType::Int => cell.parse::<i64>().is_ok() || cell.parse::<u64>().is_ok(),
            ColumnType::Float => cell.parse::<f64>().is_ok(),
            ColumnType::Datetime => DateTime::parse_from_rfc3339(cell).is_ok(),
            ColumnType::Bool => matches!(cell, "true" | "false"),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{cell:?} is not a valid {}", self.as_str()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

pub const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

/// A row type with a fixed schema.
pub trait TableRow: Sized {
    const COLUMNS: &'static [Column];

    /// Identity used when appending with deduplication.
    fn key(&self) -> String;

    fn to_cells(&self) -> Vec<String>;

    fn from_cells(cells: &Cells<'_>) -> Result<Self>;
}

// ---------------------------------------------------------------------------
// Cell access
// ---------------------------------------------------------------------------

/// One data row, addressed by column name.
pub struct Cells<'a> {
    path: &'a Path,
    line: usize,
    columns: &'static [Column],
    record: &'a csv::StringRecord,
}

impl<'a> Cells<'a> {
    pub fn invalid(&self, column: &str, reason: impl Into<String>) -> anyhow::Error {
        TallyError::ColumnType {
            path: self.path.display().to_string(),
            column: column.to_string(),
            reason: format!("line {}: {}", self.line, reason.into()),
        }
        .into()
    }

    pub fn raw(&self, column: &str) -> Result<&'a str> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| anyhow!("no column {column} in schema"))?;
        Ok(self.record.get(idx).unwrap_or(""))
    }

    pub fn string(&self, column: &str) -> Result<String> {
        Ok(self.raw(column)?.to_string())
    }

    pub fn opt_string(&self, column: &str) -> Result<Option<String>> {
        let raw = self.raw(column)?;
        Ok((!raw.is_empty()).then(|| raw.to_string()))
    }

    pub fn opt_u64(&self, column: &str) -> Result<Option<u64>> {
        let raw = self.raw(column)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse()
            .map(Some)
            .map_err(|_| self.invalid(column, format!("{raw:?} is not a non-negative int")))
    }

    pub fn datetime(&self, column: &str) -> Result<DateTime<Utc>> {
        let raw = self.raw(column)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| self.invalid(column, format!("{raw:?} is not a datetime")))
    }

    pub fn id(&self, column: &str) -> Result<TweetId> {
        let raw = self.raw(column)?;
        TweetId::parse(raw).map_err(|e| self.invalid(column, e.to_string()))
    }

    pub fn opt_id(&self, column: &str) -> Result<Option<TweetId>> {
        match self.raw(column)? {
            "" => Ok(None),
            _ => self.id(column).map(Some),
        }
    }

    /// A `sep`-joined list cell.
    pub fn list(&self, column: &str, sep: char) -> Result<Vec<&'a str>> {
        let raw = self.raw(column)?;
        Ok(raw.split(sep).filter(|s| !s.is_empty()).collect())
    }
}

pub fn fmt_datetime(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn fmt_opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Write `rows` with header and type rows, replacing the file atomically.
pub fn write_table<R: TableRow>(path: &Path, rows: &[R]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(R::COLUMNS.iter().map(|c| c.name))?;
    writer.write_record(R::COLUMNS.iter().map(|c| c.ty.as_str()))?;
    for row in rows {
        writer.write_record(row.to_cells())?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush table {}: {}", path.display(), e.error()))?;
    write_atomic(path, &bytes)
}

/// Load a table written by [`write_table`]. A missing file is an empty table.
pub fn read_table<R: TableRow>(path: &Path) -> Result<Vec<R>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let display = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open table {display}"))?;
    let mut records = reader.records();

    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let header = header.with_context(|| format!("Failed to read header of {display}"))?;
    let expected: Vec<&str> = R::COLUMNS.iter().map(|c| c.name).collect();
    let found: Vec<&str> = header.iter().collect();
    if found != expected {
        return Err(TallyError::ColumnMismatch {
            path: display,
            expected: expected.join(","),
            found: found.join(","),
        }
        .into());
    }

    let types = records
        .next()
        .ok_or_else(|| TallyError::ColumnType {
            path: display.clone(),
            column: "*".to_string(),
            reason: "missing type row".to_string(),
        })?
        .with_context(|| format!("Failed to read type row of {display}"))?;
    if types.len() != R::COLUMNS.len() {
        return Err(TallyError::ColumnType {
            path: display,
            column: "*".to_string(),
            reason: format!(
                "type row has {} entries for {} columns",
                types.len(),
                R::COLUMNS.len()
            ),
        }
        .into());
    }
    for (column, declared) in R::COLUMNS.iter().zip(types.iter()) {
        if ColumnType::parse(declared) != Some(column.ty) {
            return Err(TallyError::ColumnType {
                path: display,
                column: column.name.to_string(),
                reason: format!("declared {declared:?}, schema says {}", column.ty.as_str()),
            }
            .into());
        }
    }

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        let record = record.with_context(|| format!("Failed to read row of {display}"))?;
        let line = i + 3;
        if record.len() != R::COLUMNS.len() {
            return Err(TallyError::ColumnMismatch {
                path: display,
                expected: format!("{} cells", R::COLUMNS.len()),
                found: format!("{} cells on line {line}", record.len()),
            }
            .into());
        }
        for (column, cell) in R::COLUMNS.iter().zip(record.iter()) {
            column.ty.check(cell).map_err(|reason| TallyError::ColumnType {
                path: display.clone(),
                column: column.name.to_string(),
                reason: format!("line {line}: {reason}"),
            })?;
        }
        let cells = Cells {
            path,
            line,
            columns: R::COLUMNS,
            record: &record,
        };
        rows.push(R::from_cells(&cells)?);
    }
    Ok(rows)
}

/// Append `rows` whose key is not already present. Returns how many were added.
pub fn append_dedup<R: TableRow>(path: &Path, rows: Vec<R>) -> Result<usize> {
    let mut existing: Vec<R> = read_table(path)?;
    let mut seen: HashSet<String> = existing.iter().map(TableRow::key).collect();
    let before = existing.len();
    for row in rows {
        if seen.insert(row.key()) {
            existing.push(row);
        }
    }
    let added = existing.len() - before;
    if added > 0 || !path.exists() {
        write_table(path, &existing)?;
    }
    Ok(added)
}
