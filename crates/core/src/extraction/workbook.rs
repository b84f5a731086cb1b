use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader, SheetVisible};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A decoded cell value. Dates stay as spreadsheet serial numbers.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(f64),
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub formula: Option<String>,
    pub number_format: Option<String>,
}

impl Cell {
    pub fn empty() -> Self {
        Self { value: CellValue::Empty, formula: None, number_format: None }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self { value: CellValue::Text(value.into()), formula: None, number_format: None }
    }

    pub fn number(value: f64) -> Self {
        Self { value: CellValue::Number(value), formula: None, number_format: None }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_number_format(mut self, format: impl Into<String>) -> Self {
        self.number_format = Some(format.into());
        self
    }

    /// True for empty cells and text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match &self.value {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn has_formula(&self) -> bool {
        self.formula.as_deref().is_some_and(|formula| !formula.trim().is_empty())
    }

    /// The value as stored in the file.
    pub fn raw(&self) -> String {
        match &self.value {
            CellValue::Empty => String::new(),
            CellValue::Text(text) => text.clone(),
            CellValue::Number(number) | CellValue::Date(number) => number.to_string(),
            CellValue::Bool(flag) => flag.to_string(),
            CellValue::Error(error) => error.clone(),
        }
    }

    /// The value roughly as a spreadsheet would show it.
    pub fn display(&self) -> String {
        match &self.value {
            CellValue::Empty => String::new(),
            CellValue::Text(text) => text.trim().to_string(),
            CellValue::Number(number) | CellValue::Date(number) => format_number(*number),
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
            CellValue::Error(error) => error.clone(),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// A sheet as a dense grid anchored at A1.
#[derive(Clone, Debug, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub hidden: bool,
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), hidden: false, rows: Vec::new() }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Appends a row of cells below the current last row.
    pub fn push_row(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }

    pub fn with_row(mut self, cells: Vec<Cell>) -> Self {
        self.push_row(cells);
        self
    }

    pub fn set(&mut self, row: u32, col: u32, cell: Cell) {
        let (row, col) = (row as usize, col as usize);
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize_with(col + 1, Cell::empty);
        }
        cells[col] = cell;
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.rows.get(row as usize).and_then(|cells| cells.get(col as usize))
    }

    pub fn row(&self, row: u32) -> &[Cell] {
        self.rows.get(row as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn height(&self) -> u32 {
        self.rows.len() as u32
    }

    pub fn width(&self) -> u32 {
        self.rows.iter().map(Vec::len).max().unwrap_or(0) as u32
    }

    /// Iterates `(row, col, cell)` over every stored cell, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &Cell)> {
        self.rows.iter().enumerate().flat_map(|(row, cells)| {
            cells.iter().enumerate().map(move |(col, cell)| (row as u32, col as u32, cell))
        })
    }

    pub fn is_row_blank(&self, row: u32) -> bool {
        self.row(row).iter().all(Cell::is_blank)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("workbook could not be opened: {0}")]
    Open(String),
    #[error("sheet `{sheet}` could not be read: {message}")]
    Sheet { sheet: String, message: String },
}

/// `sha256:<hex>` digest of the uploaded bytes.
pub fn source_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Decodes xlsx/xls/xlsb/ods bytes into the in-memory model, keeping formula
/// text next to cached values.
pub fn decode(bytes: &[u8], max_bytes: usize) -> Result<Workbook, DecodeError> {
    if bytes.len() > max_bytes {
        return Err(DecodeError::TooLarge { size: bytes.len(), limit: max_bytes });
    }

    let mut reader = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|error| DecodeError::Open(error.to_string()))?;

    let metadata: Vec<(String, bool)> = reader
        .sheets_metadata()
        .iter()
        .map(|sheet| (sheet.name.clone(), sheet.visible != SheetVisible::Visible))
        .collect();

    let mut sheets = Vec::with_capacity(metadata.len());
    for (name, hidden) in metadata {
        let values = reader.worksheet_range(&name).map_err(|error| DecodeError::Sheet {
            sheet: name.clone(),
            message: error.to_string(),
        })?;
        let formulas = reader.worksheet_formula(&name).map_err(|error| DecodeError::Sheet {
            sheet: name.clone(),
            message: error.to_string(),
        })?;

        let mut sheet = Sheet::new(name);
        sheet.hidden = hidden;
        copy_values(&mut sheet, &values);
        copy_formulas(&mut sheet, &formulas);
        sheets.push(sheet);
    }

    Ok(Workbook::new(sheets))
}

fn copy_values(sheet: &mut Sheet, range: &Range<Data>) {
    let Some((start_row, start_col)) = range.start() else {
        return;
    };
    for (row, col, data) in range.cells() {
        let value = match data {
            Data::Empty => continue,
            Data::String(text) => CellValue::Text(text.clone()),
            Data::Float(number) => CellValue::Number(*number),
            Data::Int(number) => CellValue::Number(*number as f64),
            Data::Bool(flag) => CellValue::Bool(*flag),
            Data::DateTime(date) => CellValue::Date(date.as_f64()),
            Data::DateTimeIso(text) | Data::DurationIso(text) => CellValue::Text(text.clone()),
            Data::Error(error) => CellValue::Error(error.to_string()),
        };
        sheet.set(
            start_row + row as u32,
            start_col + col as u32,
            Cell { value, formula: None, number_format: None },
        );
    }
}

fn copy_formulas(sheet: &mut Sheet, range: &Range<String>) {
    let Some((start_row, start_col)) = range.start() else {
        return;
    };
    for (row, col, formula) in range.cells() {
        if formula.trim().is_empty() {
            continue;
        }
        let (row, col) = (start_row + row as u32, start_col + col as u32);
        let mut cell = sheet.cell(row, col).cloned().unwrap_or_else(Cell::empty);
        cell.formula = Some(formula.clone());
        sheet.set(row, col, cell);
    }
}
