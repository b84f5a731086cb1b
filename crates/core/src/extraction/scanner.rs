use crate::domain::evidence::CellAddress;
use crate::extraction::normalize::looks_numeric;
use crate::extraction::workbook::{Cell, CellValue, Sheet, Workbook};

#[derive(Clone, Debug, PartialEq)]
pub struct FormulaHit {
    pub sheet: String,
    pub address: CellAddress,
    pub formula: String,
}

/// Every formula cell in the workbook, hidden sheets included. Returns at
/// most `limit` hits plus the total count.
pub fn find_formulas(workbook: &Workbook, limit: usize) -> (Vec<FormulaHit>, usize) {
    let mut hits = Vec::new();
    let mut total = 0usize;
    for sheet in &workbook.sheets {
        for (row, col, cell) in sheet.cells() {
            if !cell.has_formula() {
                continue;
            }
            total += 1;
            if hits.len() < limit {
                hits.push(FormulaHit {
                    sheet: sheet.name.clone(),
                    address: CellAddress::new(row, col),
                    formula: cell.formula.clone().unwrap_or_default(),
                });
            }
        }
    }
    (hits, total)
}

#[derive(Clone, Debug, PartialEq)]
pub struct SheetScore {
    pub index: usize,
    pub name: String,
    pub score: f64,
    pub density: f64,
    pub used_rows: u32,
    pub used_cols: u32,
}

fn is_text(cell: &Cell) -> bool {
    match &cell.value {
        CellValue::Text(text) => !text.trim().is_empty() && !looks_numeric(text),
        _ => false,
    }
}

fn is_numeric(cell: &Cell) -> bool {
    match &cell.value {
        CellValue::Number(_) => true,
        CellValue::Text(text) => looks_numeric(text),
        _ => false,
    }
}

fn row_plausibility(rows: u32) -> f64 {
    match rows {
        2..=5000 => 1.0,
        0 | 1 => 0.0,
        _ => 0.5,
    }
}

fn column_plausibility(cols: u32) -> f64 {
    match cols {
        3..=20 => 1.0,
        2 | 21..=30 => 0.5,
        _ => 0.0,
    }
}

/// Scores how much a sheet looks like an order table.
pub fn score_sheet(index: usize, sheet: &Sheet) -> SheetScore {
    let mut min_row = u32::MAX;
    let mut max_row = 0u32;
    let mut min_col = u32::MAX;
    let mut max_col = 0u32;
    let mut filled = 0usize;
    for (row, col, cell) in sheet.cells() {
        if cell.is_blank() {
            continue;
        }
        filled += 1;
        min_row = min_row.min(row);
        max_row = max_row.max(row);
        min_col = min_col.min(col);
        max_col = max_col.max(col);
    }

    if filled == 0 {
        return SheetScore {
            index,
            name: sheet.name.clone(),
            score: 0.0,
            density: 0.0,
            used_rows: 0,
            used_cols: 0,
        };
    }

    let used_rows = (min_row..=max_row).filter(|row| !sheet.is_row_blank(*row)).count() as u32;
    let used_cols = max_col - min_col + 1;
    let area = f64::from(max_row - min_row + 1) * f64::from(used_cols);
    let density = filled as f64 / area;

    let mut has_numeric_column = false;
    let mut has_text_column = false;
    for col in min_col..=max_col {
        let cells: Vec<&Cell> = (min_row..=max_row)
            .filter_map(|row| sheet.cell(row, col))
            .filter(|cell| !cell.is_blank())
            .collect();
        if cells.is_empty() {
            continue;
        }
        let numeric = cells.iter().filter(|cell| is_numeric(cell)).count();
        let text = cells.iter().filter(|cell| is_text(cell)).count();
        has_numeric_column |= numeric * 2 >= cells.len();
        has_text_column |= text * 2 >= cells.len();
    }
    let mix = match (has_numeric_column, has_text_column) {
        (true, true) => 1.0,
        (false, false) => 0.0,
        _ => 0.5,
    };

    let score = 0.3 * density
        + 0.2 * row_plausibility(used_rows)
        + 0.25 * column_plausibility(used_cols)
        + 0.25 * mix;

    SheetScore { index, name: sheet.name.clone(), score, density, used_rows, used_cols }
}

/// Scores visible sheets and picks the best one. Ties go to the earlier
/// sheet; a best score under `floor` selects nothing.
pub fn select_sheet(workbook: &Workbook, floor: f64) -> (Option<SheetScore>, Vec<SheetScore>) {
    let scores: Vec<SheetScore> = workbook
        .sheets
        .iter()
        .enumerate()
        .filter(|(_, sheet)| !sheet.hidden)
        .map(|(index, sheet)| score_sheet(index, sheet))
        .collect();

    let mut best: Option<&SheetScore> = None;
    for score in &scores {
        if best.map_or(true, |current| score.score > current.score) {
            best = Some(score);
        }
    }
    let selected = best.filter(|score| score.score >= floor).cloned();
    (selected, scores)
}

#[cfg(test)]
mod tests {
    use super::{find_formulas, score_sheet, select_sheet};
    use crate::domain::evidence::CellAddress;
    use crate::extraction::workbook::{Cell, Sheet, Workbook};

    fn order_sheet(name: &str) -> Sheet {
        Sheet::new(name)
            .with_row(vec![
                Cell::text("SKU"),
                Cell::text("Description"),
                Cell::text("Qty"),
                Cell::text("Price"),
            ])
            .with_row(vec![
                Cell::text("A-1"),
                Cell::text("Widget"),
                Cell::number(2.0),
                Cell::number(9.5),
            ])
            .with_row(vec![
                Cell::text("A-2"),
                Cell::text("Gadget"),
                Cell::number(1.0),
                Cell::number(3.0),
            ])
    }

    #[test]
    fn formulas_are_found_on_hidden_sheets_too() {
        let mut hidden = Sheet::new("Calc").hidden();
        hidden.set(4, 1, Cell::number(3.0).with_formula("SUM(A1:A3)"));
        let workbook = Workbook::new(vec![order_sheet("Orders"), hidden]);

        let (hits, total) = find_formulas(&workbook, 10);
        assert_eq!(total, 1);
        assert_eq!(hits[0].sheet, "Calc");
        assert_eq!(hits[0].address, CellAddress::new(4, 1));
    }

    #[test]
    fn formula_hits_are_bounded() {
        let mut sheet = Sheet::new("Calc");
        for row in 0..30 {
            sheet.set(row, 0, Cell::number(1.0).with_formula("1+0"));
        }
        let (hits, total) = find_formulas(&Workbook::new(vec![sheet]), 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(total, 30);
    }

    #[test]
    fn table_like_sheet_scores_high() {
        let score = score_sheet(0, &order_sheet("Orders"));
        assert!((score.score - 1.0).abs() < 1e-9, "score was {}", score.score);
        assert_eq!(score.used_rows, 3);
        assert_eq!(score.used_cols, 4);
    }

    #[test]
    fn picks_order_sheet_over_notes_and_skips_hidden() {
        let notes = Sheet::new("Notes").with_row(vec![Cell::text("Deliver before Friday")]);
        let hidden = order_sheet("Archive").hidden();
        let workbook = Workbook::new(vec![notes, hidden, order_sheet("Orders")]);

        let (selected, scores) = select_sheet(&workbook, 0.3);
        assert_eq!(selected.map(|score| score.name), Some("Orders".to_string()));
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn ties_go_to_the_first_sheet() {
        let workbook = Workbook::new(vec![order_sheet("First"), order_sheet("Second")]);
        let (selected, _) = select_sheet(&workbook, 0.3);
        assert_eq!(selected.map(|score| score.index), Some(0));
    }

    #[test]
    fn empty_workbook_selects_nothing() {
        let workbook = Workbook::new(vec![Sheet::new("Empty")]);
        let (selected, _) = select_sheet(&workbook, 0.3);
        assert!(selected.is_none());
    }
}
