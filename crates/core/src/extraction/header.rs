use std::collections::BTreeSet;

use crate::extraction::lexicon::{fold_label, keyword_hit};
use crate::extraction::normalize::looks_numeric;
use crate::extraction::workbook::{CellValue, Sheet};

const MIN_TEXT_RATIO: f64 = 0.5;
const MIN_FILLED_CELLS: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct HeaderScore {
    pub row: u32,
    pub score: f64,
    pub keyword_hits: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeaderDetection {
    pub row: u32,
    pub score: f64,
    /// False when no row qualified and `row` is only the first non-empty row.
    pub found: bool,
}

/// Scores one row as a header candidate. Rows with too few cells or mostly
/// numbers are not candidates.
pub fn score_row(sheet: &Sheet, row: u32, scan_rows: u32) -> Option<HeaderScore> {
    let cells: Vec<&CellValue> = sheet
        .row(row)
        .iter()
        .filter(|cell| !cell.is_blank())
        .map(|cell| &cell.value)
        .collect();
    if cells.len() < MIN_FILLED_CELLS {
        return None;
    }

    let labels: Vec<&str> = cells
        .iter()
        .filter_map(|value| match value {
            CellValue::Text(text) if !looks_numeric(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let text_ratio = labels.len() as f64 / cells.len() as f64;
    if text_ratio < MIN_TEXT_RATIO {
        return None;
    }

    let distinct: BTreeSet<String> = labels.iter().map(|label| fold_label(label)).collect();
    let variety = distinct.len() as f64 / cells.len() as f64;
    let keyword_hits = labels.iter().filter(|label| keyword_hit(label)).count();
    let keyword_score = (keyword_hits as f64 / 3.0).min(1.0);
    let position = 1.0 - f64::from(row) / f64::from(scan_rows.max(1));

    let score = 0.15 * position + 0.3 * text_ratio + 0.15 * variety + 0.4 * keyword_score;
    Some(HeaderScore { row, score, keyword_hits })
}

/// Picks the best header row among the first `scan_rows` rows. Falls back to
/// the first non-empty row with `found == false`.
pub fn locate_header(sheet: &Sheet, scan_rows: u32, floor: f64) -> Option<HeaderDetection> {
    let limit = scan_rows.min(sheet.height());
    let mut best: Option<HeaderScore> = None;
    for row in 0..limit {
        let Some(candidate) = score_row(sheet, row, scan_rows) else {
            continue;
        };
        if best.as_ref().map_or(true, |current| candidate.score > current.score) {
            best = Some(candidate);
        }
    }

    match best.filter(|candidate| candidate.score >= floor) {
        Some(candidate) => {
            Some(HeaderDetection { row: candidate.row, score: candidate.score, found: true })
        }
        None => (0..sheet.height())
            .find(|row| !sheet.is_row_blank(*row))
            .map(|row| HeaderDetection { row, score: 0.0, found: false }),
    }
}
