use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::domain::column::{NumericConvention, SchemaInference};
use crate::domain::evidence::{CellAddress, EvidenceId, EvidenceStore};
use crate::domain::field::CanonicalField;
use crate::domain::issue::{Issue, IssueCode, IssueLog};
use crate::domain::order::{CustomerRef, DocumentTotals, FieldValue, LineItem, ResolutionStatus};
use crate::extraction::lexicon::{strip_customer_label, total_kind, TotalKind};
use crate::extraction::normalize::{
    decimal_from_f64, gs1_checksum_valid, is_gtin_candidate, normalize_identifier, parse_decimal,
};
use crate::extraction::schema::record;
use crate::extraction::workbook::{Cell, CellValue, Sheet};

const ITEM_FIELDS: [CanonicalField; 5] = [
    CanonicalField::Sku,
    CanonicalField::Description,
    CanonicalField::Quantity,
    CanonicalField::UnitPrice,
    CanonicalField::LineTotal,
];

#[derive(Debug, Clone, PartialEq)]
pub struct RowExtraction {
    pub line_items: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub customer: CustomerRef,
    pub skipped_total_rows: Vec<u32>,
}

/// Non-blank rows below the header.
pub fn data_rows(sheet: &Sheet, header_row: u32) -> Vec<u32> {
    (header_row + 1..sheet.height()).filter(|row| !sheet.is_row_blank(*row)).collect()
}

struct RowReader<'a> {
    sheet: &'a Sheet,
    conventions: BTreeMap<CanonicalField, (u32, NumericConvention)>,
}

impl<'a> RowReader<'a> {
    fn new(sheet: &'a Sheet, schema: &'a SchemaInference) -> Self {
        let conventions = schema
            .mappings
            .iter()
            .filter_map(|mapping| {
                schema
                    .column(&mapping.column_id)
                    .map(|column| (mapping.field, (column.index, column.convention)))
            })
            .collect();
        Self { sheet, conventions }
    }

    fn cell(&self, row: u32, field: CanonicalField) -> Option<(u32, &'a Cell)> {
        let (col, _) = self.conventions.get(&field)?;
        self.sheet.cell(row, *col).filter(|cell| !cell.is_blank()).map(|cell| (*col, cell))
    }

    fn column(&self, field: CanonicalField) -> Option<u32> {
        self.conventions.get(&field).map(|(col, _)| *col)
    }

    fn convention(&self, field: CanonicalField) -> NumericConvention {
        self.conventions.get(&field).map(|(_, convention)| *convention).unwrap_or_default()
    }
}

fn parse_cell_number(cell: &Cell, convention: NumericConvention) -> Option<Decimal> {
    match &cell.value {
        CellValue::Number(number) => decimal_from_f64(*number),
        CellValue::Text(text) => parse_decimal(text, convention),
        _ => None,
    }
}

fn identifier_text(cell: &Cell) -> String {
    match &cell.value {
        CellValue::Number(_) => cell.display(),
        _ => normalize_identifier(&cell.display()),
    }
}

/// Walks the data rows, building line items and document totals. Every value
/// kept on an item gets an evidence cell.
pub fn extract_rows(
    sheet: &Sheet,
    header_row: u32,
    schema: &SchemaInference,
    evidence: &mut EvidenceStore,
    issues: &mut IssueLog,
) -> RowExtraction {
    let reader = RowReader::new(sheet, schema);
    let mut line_items = Vec::new();
    let mut totals = DocumentTotals::default();
    let mut skipped_total_rows = Vec::new();
    let mut customers: Vec<(String, EvidenceId)> = Vec::new();

    for row in data_rows(sheet, header_row) {
        let has_sku = reader.cell(row, CanonicalField::Sku).is_some();
        let has_quantity = reader.cell(row, CanonicalField::Quantity).is_some();

        // Keyword rows holding an sku or a quantity stay lines unless the
        // keyword sits in the sku column itself.
        if let Some((col, kind)) = total_keyword(sheet, row) {
            let in_sku_column = reader.column(CanonicalField::Sku) == Some(col);
            if in_sku_column || (!has_sku && !has_quantity) {
                skipped_total_rows.push(row);
                if let Some(amount) = total_amount(&reader, row, evidence) {
                    let slot = match kind {
                        TotalKind::Subtotal => &mut totals.subtotal,
                        TotalKind::Tax => &mut totals.tax,
                        TotalKind::Total => &mut totals.total,
                    };
                    if slot.is_none() {
                        *slot = Some(amount);
                    }
                }
                continue;
            }
        } else if !has_sku && !has_quantity {
            let has_amount = [CanonicalField::UnitPrice, CanonicalField::LineTotal]
                .into_iter()
                .any(|field| reader.cell(row, field).is_some());
            let has_description = reader.cell(row, CanonicalField::Description).is_some();
            if !has_description && has_amount {
                skipped_total_rows.push(row);
                continue;
            }
        }

        if !ITEM_FIELDS.iter().any(|field| reader.cell(row, *field).is_some()) {
            continue;
        }

        if let Some((col, cell)) = reader.cell(row, CanonicalField::Customer) {
            let id = record(evidence, sheet, row, col, cell);
            customers.push((cell.display(), id));
        }

        line_items.push(read_line(&reader, row, evidence, issues));
    }

    let customer = resolve_customer(sheet, header_row, customers, evidence, issues);

    RowExtraction { line_items, totals, customer, skipped_total_rows }
}

fn read_line(
    reader: &RowReader<'_>,
    row: u32,
    evidence: &mut EvidenceStore,
    issues: &mut IssueLog,
) -> LineItem {
    let sheet = reader.sheet;
    let mut line = LineItem::new(row);

    if let Some((col, cell)) = reader.cell(row, CanonicalField::Sku) {
        let id = record(evidence, sheet, row, col, cell);
        let sku = identifier_text(cell);
        if is_gtin_candidate(&sku) && !gs1_checksum_valid(&sku) {
            issues.push(
                Issue::new(
                    IssueCode::IdentifierChecksumFailed,
                    format!(
                        "{} at {}!{} fails the GS1 check digit",
                        sku,
                        sheet.name,
                        CellAddress::new(row, col)
                    ),
                )
                .with_evidence([id]),
            );
        }
        line.sku = Some(FieldValue::new(sku, id));
    }

    for (field, slot) in [
        (CanonicalField::Description, &mut line.description),
        (CanonicalField::Currency, &mut line.currency),
        (CanonicalField::Unit, &mut line.unit),
    ] {
        if let Some((col, cell)) = reader.cell(row, field) {
            let id = record(evidence, sheet, row, col, cell);
            *slot = Some(FieldValue::new(cell.display(), id));
        }
    }

    for (field, slot) in [
        (CanonicalField::Quantity, &mut line.quantity),
        (CanonicalField::UnitPrice, &mut line.unit_price),
        (CanonicalField::LineTotal, &mut line.line_total),
    ] {
        let Some((col, cell)) = reader.cell(row, field) else {
            continue;
        };
        let id = record(evidence, sheet, row, col, cell);
        match parse_cell_number(cell, reader.convention(field)) {
            Some(value) => *slot = Some(FieldValue::new(value, id)),
            None => issues.push(
                Issue::new(
                    IssueCode::UnparseableNumber,
                    format!(
                        "{} value `{}` at {}!{} is not a number",
                        field,
                        cell.display(),
                        sheet.name,
                        CellAddress::new(row, col)
                    ),
                )
                .with_evidence([id]),
            ),
        }
    }

    line
}

/// Column and kind of the first total keyword in the row.
fn total_keyword(sheet: &Sheet, row: u32) -> Option<(u32, TotalKind)> {
    sheet.row(row).iter().enumerate().find_map(|(col, cell)| match &cell.value {
        CellValue::Text(text) => total_kind(text).map(|kind| (col as u32, kind)),
        _ => None,
    })
}

/// The amount of a total row: the line-total cell when present, otherwise the
/// rightmost number in the row.
fn total_amount(
    reader: &RowReader<'_>,
    row: u32,
    evidence: &mut EvidenceStore,
) -> Option<FieldValue<Decimal>> {
    let sheet = reader.sheet;
    let line_total = reader.cell(row, CanonicalField::LineTotal).and_then(|(col, cell)| {
        parse_cell_number(cell, reader.convention(CanonicalField::LineTotal))
            .map(|value| (col, cell, value))
    });
    let (col, cell, value) = line_total.or_else(|| {
        sheet.row(row).iter().enumerate().rev().find_map(|(col, cell)| {
            let value = match &cell.value {
                CellValue::Number(number) => decimal_from_f64(*number),
                CellValue::Text(text) => parse_decimal(text, NumericConvention::default()),
                _ => None,
            }?;
            Some((col as u32, cell, value))
        })
    })?;

    let id = record(evidence, sheet, row, col, cell);
    Some(FieldValue::new(value, id))
}

/// First customer value in the customer column, else a "Customer: X" label
/// above the header. Differing values are flagged.
fn resolve_customer(
    sheet: &Sheet,
    header_row: u32,
    column_values: Vec<(String, EvidenceId)>,
    evidence: &mut EvidenceStore,
    issues: &mut IssueLog,
) -> CustomerRef {
    let mut candidates = column_values;
    if candidates.is_empty() {
        candidates.extend(labelled_customer(sheet, header_row, evidence));
    }

    let Some((name, id)) = candidates.first().cloned() else {
        return CustomerRef::missing();
    };

    let differing: Vec<EvidenceId> = candidates
        .iter()
        .filter(|(other, _)| !other.eq_ignore_ascii_case(&name))
        .map(|(_, id)| *id)
        .collect();
    if !differing.is_empty() {
        issues.push(
            Issue::new(
                IssueCode::MultipleCustomers,
                format!("order names more than one customer; using `{name}`"),
            )
            .with_evidence(std::iter::once(id).chain(differing)),
        );
    }

    CustomerRef { name: Some(name), status: ResolutionStatus::Extracted, evidence: vec![id] }
}

fn labelled_customer(
    sheet: &Sheet,
    header_row: u32,
    evidence: &mut EvidenceStore,
) -> Option<(String, EvidenceId)> {
    for row in 0..header_row {
        let cells = sheet.row(row);
        for (col, cell) in cells.iter().enumerate() {
            let CellValue::Text(text) = &cell.value else {
                continue;
            };
            let Some(rest) = strip_customer_label(text) else {
                continue;
            };
            if !rest.is_empty() {
                let id = record(evidence, sheet, row, col as u32, cell);
                return Some((rest, id));
            }
            let neighbour = cells
                .iter()
                .enumerate()
                .skip(col + 1)
                .find(|(_, next)| !next.is_blank());
            if let Some((next_col, next)) = neighbour {
                let id = record(evidence, sheet, row, next_col as u32, next);
                return Some((next.display(), id));
            }
        }
    }
    None
}
