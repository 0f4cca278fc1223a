//! Tabular view of a captured CSV payload.
//!
//! The column set is whatever the site serves; the only checks are that the
//! body is UTF-8, has a non-empty header row and every record has as many
//! fields as the header.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, ScrapeError};

/// One parsed CSV field, typed by inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Cell {
    fn infer(raw: &str) -> Cell {
        let s = raw.trim();
        if s.is_empty() {
            return Cell::Empty;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Cell::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return Cell::Float(f);
        }
        match s {
            "True" | "true" | "TRUE" => Cell::Bool(true),
            "False" | "false" | "FALSE" => Cell::Bool(false),
            _ => Cell::Text(raw.to_string()),
        }
    }

    /// Numeric value, if the cell holds one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// Header row plus typed rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Decode a response body as UTF-8 and parse it as CSV.
    pub fn from_csv_bytes(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ScrapeError::parse(format!("response body is not UTF-8: {}", e)))?;
        Self::from_csv_str(text)
    }

    pub fn from_csv_str(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| ScrapeError::parse(format!("bad CSV header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if columns.is_empty() || columns.iter().all(String::is_empty) {
            return Err(ScrapeError::parse("CSV payload has no header row"));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ScrapeError::parse(format!("bad CSV record: {}", e)))?;
            rows.push(record.iter().map(Cell::infer).collect());
        }

        Ok(Table { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|cells| Row { table: self, cells })
    }

    pub fn last_row(&self) -> Option<Row<'_>> {
        self.rows.len().checked_sub(1).and_then(|i| self.row(i))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row { table: self, cells })
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.table.column_index(column).map(|i| &self.cells[i])
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }
}
