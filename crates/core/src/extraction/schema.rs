//! Column typing and field-to-column assignment.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;

use crate::domain::column::{
    CandidateColumn, ColumnMapping, ColumnType, MappingMethod, NumericConvention,
    ScoredCandidate, SchemaInference, MAX_COLUMN_SAMPLES,
};
use crate::domain::evidence::{column_letter, CellAddress, EvidenceStore};
use crate::domain::field::{CanonicalField, ColumnId};
use crate::extraction::lexicon::{contains_phrase, fold_label, synonyms};
use crate::extraction::normalize::{detect_convention, parse_decimal};
use crate::extraction::workbook::{Cell, CellValue, Sheet};

/// Header match weight and type compatibility weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemaWeights {
    pub header: f64,
    pub type_compatibility: f64,
}

pub const DEFAULT_SCHEMA_WEIGHTS: SchemaWeights =
    SchemaWeights { header: 0.7, type_compatibility: 0.3 };

const CONTAINMENT_SCORE: f64 = 0.85;
const FUZZY_FLOOR: f64 = 0.85;
const FUZZY_CAP: f64 = 0.9;
const MAX_CANDIDATES_PER_FIELD: usize = 5;

pub const REQUIRED_FIELDS: [CanonicalField; 2] = [CanonicalField::Sku, CanonicalField::Quantity];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemaSettings {
    pub mapping_floor: f64,
    pub ambiguity_margin: f64,
}

/// Forced field assignments, applied before greedy matching.
pub type MappingOverrides = BTreeMap<CanonicalField, (ColumnId, MappingMethod)>;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaOutcome {
    pub inference: SchemaInference,
    /// Columns whose samples mixed decimal separators.
    pub mixed_columns: Vec<ColumnId>,
}

pub fn type_compatibility(field: CanonicalField, column_type: ColumnType) -> f64 {
    use CanonicalField as F;
    use ColumnType as T;
    match (field, column_type) {
        (F::Customer, T::Text) | (F::Description, T::Text) => 1.0,
        (F::Customer, T::Identifier) | (F::Description, T::Identifier) => 0.3,
        (F::Sku, T::Identifier) => 1.0,
        (F::Sku, T::Integer) => 0.6,
        (F::Sku, T::Text) => 0.5,
        (F::Quantity, T::Integer) => 1.0,
        (F::Quantity, T::Decimal) => 0.7,
        (F::UnitPrice | F::LineTotal, T::Decimal) => 1.0,
        (F::UnitPrice | F::LineTotal, T::Integer) => 0.8,
        (F::Currency, T::Text | T::Identifier) => 0.6,
        (F::Unit, T::Text) => 0.6,
        (F::Unit, T::Identifier) => 0.4,
        _ => 0.0,
    }
}

/// Header similarity to a field's vocabulary and the method it implies.
pub fn header_match(header: &str, field: CanonicalField) -> (f64, MappingMethod) {
    let folded = fold_label(header);
    if folded.is_empty() {
        return (0.0, MappingMethod::TypeOnly);
    }

    let words = synonyms(field);
    if words.iter().any(|word| *word == folded) {
        return (1.0, MappingMethod::ExactSynonym);
    }

    let contained = words
        .iter()
        .any(|word| word.len() >= 3 && contains_phrase(&folded, word))
        .then_some(CONTAINMENT_SCORE)
        .unwrap_or(0.0);
    let fuzzy = words
        .iter()
        .map(|word| strsim::jaro_winkler(&folded, word))
        .fold(0.0_f64, f64::max);
    let fuzzy = if fuzzy >= FUZZY_FLOOR { fuzzy.min(FUZZY_CAP) } else { 0.0 };

    let score = contained.max(fuzzy);
    if score > 0.0 {
        (score, MappingMethod::FuzzySynonym)
    } else {
        (0.0, MappingMethod::TypeOnly)
    }
}

fn looks_like_identifier(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed.chars().count() <= 40
        && trimmed.chars().any(|ch| ch.is_ascii_digit())
        && trimmed.chars().all(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '#'))
}

fn classify(cell: &Cell, convention: NumericConvention) -> Option<ColumnType> {
    match &cell.value {
        CellValue::Empty | CellValue::Error(_) => None,
        CellValue::Number(number) => {
            Some(if number.fract() == 0.0 { ColumnType::Integer } else { ColumnType::Decimal })
        }
        CellValue::Bool(_) => Some(ColumnType::Boolean),
        CellValue::Date(_) => Some(ColumnType::Date),
        CellValue::Text(text) if text.trim().is_empty() => None,
        CellValue::Text(text) => Some(match parse_decimal(text, convention) {
            Some(value) if value.fract() == Decimal::ZERO => ColumnType::Integer,
            Some(_) => ColumnType::Decimal,
            None if looks_like_identifier(text) => ColumnType::Identifier,
            None => ColumnType::Text,
        }),
    }
}

/// Majority type over the column's cells. Integer and decimal cells pool
/// together as numbers.
fn infer_type(types: &[ColumnType]) -> (ColumnType, f64) {
    if types.is_empty() {
        return (ColumnType::Empty, 0.0);
    }
    let mut counts: BTreeMap<ColumnType, usize> = BTreeMap::new();
    for column_type in types {
        *counts.entry(*column_type).or_default() += 1;
    }
    let integers = counts.get(&ColumnType::Integer).copied().unwrap_or(0);
    let decimals = counts.get(&ColumnType::Decimal).copied().unwrap_or(0);
    let numeric = integers + decimals;

    let other = counts
        .iter()
        .filter(|(column_type, _)| {
            !matches!(column_type, ColumnType::Integer | ColumnType::Decimal)
        })
        .max_by(|left, right| left.1.cmp(right.1).then(right.0.cmp(left.0)))
        .map(|(column_type, count)| (*column_type, *count));

    let total = types.len() as f64;
    match other {
        Some((column_type, count)) if count > numeric => (column_type, count as f64 / total),
        _ => {
            let column_type = if decimals > 0 { ColumnType::Decimal } else { ColumnType::Integer };
            (column_type, numeric as f64 / total)
        }
    }
}

fn build_columns(
    sheet: &Sheet,
    header_row: u32,
    data_rows: &[u32],
    evidence: &mut EvidenceStore,
) -> (Vec<CandidateColumn>, Vec<ColumnId>) {
    let width = std::iter::once(header_row)
        .chain(data_rows.iter().copied())
        .map(|row| sheet.row(row).len() as u32)
        .max()
        .unwrap_or(0);

    let mut columns = Vec::new();
    let mut mixed = Vec::new();
    for index in 0..width {
        let header_cell = sheet.cell(header_row, index).filter(|cell| !cell.is_blank());
        let cells: Vec<(u32, &Cell)> = data_rows
            .iter()
            .filter_map(|row| sheet.cell(*row, index).map(|cell| (*row, cell)))
            .filter(|(_, cell)| !cell.is_blank())
            .collect();
        if header_cell.is_none() && cells.is_empty() {
            continue;
        }

        let id = ColumnId(column_letter(index));
        let (convention, is_mixed) = detect_convention(cells.iter().filter_map(|(_, cell)| {
            match &cell.value {
                CellValue::Text(text) => Some(text.as_str()),
                _ => None,
            }
        }));
        if is_mixed {
            mixed.push(id.clone());
        }

        let types: Vec<ColumnType> =
            cells.iter().filter_map(|(_, cell)| classify(cell, convention)).collect();
        let (inferred_type, type_confidence) = infer_type(&types);

        let mut column_evidence = Vec::new();
        if let Some(cell) = header_cell {
            column_evidence.push(record(evidence, sheet, header_row, index, cell));
        }
        let mut samples = Vec::new();
        for (row, cell) in cells.iter().take(MAX_COLUMN_SAMPLES) {
            column_evidence.push(record(evidence, sheet, *row, index, cell));
            samples.push(cell.display());
        }

        columns.push(CandidateColumn {
            id,
            index,
            header: header_cell.map(Cell::display).unwrap_or_default(),
            samples,
            inferred_type,
            type_confidence,
            convention,
            evidence: column_evidence,
        });
    }
    (columns, mixed)
}

pub(crate) fn record(
    evidence: &mut EvidenceStore,
    sheet: &Sheet,
    row: u32,
    col: u32,
    cell: &Cell,
) -> crate::domain::evidence::EvidenceId {
    evidence.record(
        &sheet.name,
        CellAddress::new(row, col),
        cell.raw(),
        cell.display(),
        cell.number_format.clone(),
    )
}

struct Scored {
    field: CanonicalField,
    column: usize,
    score: f64,
    header_score: f64,
    type_score: f64,
    method: MappingMethod,
}

fn score_all(columns: &[CandidateColumn], weights: SchemaWeights) -> Vec<Scored> {
    let mut scored = Vec::new();
    for field in CanonicalField::ALL {
        for (position, column) in columns.iter().enumerate() {
            let (header_score, method) = header_match(&column.header, field);
            let type_score =
                type_compatibility(field, column.inferred_type) * column.type_confidence;
            let score = weights.header * header_score + weights.type_compatibility * type_score;
            scored.push(Scored { field, column: position, score, header_score, type_score, method });
        }
    }
    scored
}

/// Types every column, then assigns fields greedily by descending score.
pub fn infer_schema(
    sheet: &Sheet,
    header_row: u32,
    data_rows: &[u32],
    evidence: &mut EvidenceStore,
    settings: SchemaSettings,
    overrides: &MappingOverrides,
) -> SchemaOutcome {
    let (columns, mixed_columns) = build_columns(sheet, header_row, data_rows, evidence);
    let scored = score_all(&columns, DEFAULT_SCHEMA_WEIGHTS);

    let mut candidates: BTreeMap<CanonicalField, Vec<ScoredCandidate>> = BTreeMap::new();
    for field in CanonicalField::ALL {
        let mut ranked: Vec<&Scored> =
            scored.iter().filter(|entry| entry.field == field && entry.score > 0.0).collect();
        ranked.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then(left.column.cmp(&right.column))
        });
        let list: Vec<ScoredCandidate> = ranked
            .into_iter()
            .take(MAX_CANDIDATES_PER_FIELD)
            .map(|entry| ScoredCandidate {
                column_id: columns[entry.column].id.clone(),
                score: entry.score,
                header_score: entry.header_score,
                type_score: entry.type_score,
            })
            .collect();
        if !list.is_empty() {
            candidates.insert(field, list);
        }
    }

    let mut mappings: Vec<ColumnMapping> = Vec::new();
    let mut taken_columns: BTreeSet<usize> = BTreeSet::new();
    let mut forced: BTreeSet<CanonicalField> = BTreeSet::new();

    for (field, (column_id, method)) in overrides {
        let Some(position) = columns.iter().position(|column| &column.id == column_id) else {
            tracing::warn!(
                event_name = "extraction.schema.override_ignored",
                field = field.as_str(),
                column_id = column_id.as_str(),
                "mapping override names a column that does not exist"
            );
            continue;
        };
        if !taken_columns.insert(position) {
            continue;
        }
        let confidence = scored
            .iter()
            .find(|entry| entry.field == *field && entry.column == position)
            .map(|entry| entry.score)
            .unwrap_or(0.0);
        mappings.push(ColumnMapping {
            field: *field,
            column_id: column_id.clone(),
            confidence,
            method: *method,
        });
        forced.insert(*field);
    }

    let mut ordered: Vec<&Scored> =
        scored.iter().filter(|entry| entry.score >= settings.mapping_floor).collect();
    ordered.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.field.cmp(&right.field))
            .then(left.column.cmp(&right.column))
    });
    for entry in ordered {
        if forced.contains(&entry.field)
            || mappings.iter().any(|mapping| mapping.field == entry.field)
            || taken_columns.contains(&entry.column)
        {
            continue;
        }
        taken_columns.insert(entry.column);
        mappings.push(ColumnMapping {
            field: entry.field,
            column_id: columns[entry.column].id.clone(),
            confidence: entry.score,
            method: entry.method,
        });
    }
    mappings.sort_by(|left, right| left.field.cmp(&right.field));

    let ambiguous_fields: Vec<CanonicalField> = mappings
        .iter()
        .filter(|mapping| !forced.contains(&mapping.field))
        .filter(|mapping| {
            scored.iter().any(|entry| {
                entry.field == mapping.field
                    && columns[entry.column].id != mapping.column_id
                    && entry.score >= settings.mapping_floor
                    && mapping.confidence - entry.score <= settings.ambiguity_margin
            })
        })
        .map(|mapping| mapping.field)
        .collect();

    let unmapped_fields: Vec<CanonicalField> = CanonicalField::ALL
        .into_iter()
        .filter(|field| !mappings.iter().any(|mapping| mapping.field == *field))
        .collect();

    SchemaOutcome {
        inference: SchemaInference {
            columns,
            mappings,
            candidates,
            ambiguous_fields,
            unmapped_fields,
        },
        mixed_columns,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        header_match, infer_schema, MappingOverrides, SchemaSettings, REQUIRED_FIELDS,
    };
    use crate::domain::column::{ColumnType, MappingMethod};
    use crate::domain::evidence::EvidenceStore;
    use crate::domain::field::{CanonicalField, ColumnId};
    use crate::extraction::workbook::{Cell, Sheet};

    const SETTINGS: SchemaSettings = SchemaSettings { mapping_floor: 0.45, ambiguity_margin: 0.1 };

    fn sheet() -> Sheet {
        Sheet::new("Orders")
            .with_row(vec![
                Cell::text("Customer"),
                Cell::text("SKU"),
                Cell::text("Qty"),
                Cell::text("Unit Price"),
                Cell::text("Total"),
            ])
            .with_row(vec![
                Cell::text("Acme Corp"),
                Cell::text("ABC-001"),
                Cell::number(10.0),
                Cell::number(25.0),
                Cell::number(250.0),
            ])
    }

    #[test]
    fn header_matching_prefers_exact_synonyms() {
        assert_eq!(header_match("Qty", CanonicalField::Quantity), (1.0, MappingMethod::ExactSynonym));
        let (score, method) = header_match("Quantty", CanonicalField::Quantity);
        assert!(score >= 0.85 && score <= 0.9);
        assert_eq!(method, MappingMethod::FuzzySynonym);
        let (score, _) = header_match("Ordered Qty", CanonicalField::Quantity);
        assert!((score - 0.85).abs() < 1e-9);
        assert_eq!(header_match("Notes", CanonicalField::Quantity).0, 0.0);
    }

    #[test]
    fn maps_the_basic_order_layout_without_ambiguity() {
        let mut evidence = EvidenceStore::new();
        let outcome =
            infer_schema(&sheet(), 0, &[1], &mut evidence, SETTINGS, &MappingOverrides::new());
        let inference = outcome.inference;

        let column = |field| inference.mapping(field).map(|mapping| mapping.column_id.0.clone());
        assert_eq!(column(CanonicalField::Customer).as_deref(), Some("A"));
        assert_eq!(column(CanonicalField::Sku).as_deref(), Some("B"));
        assert_eq!(column(CanonicalField::Quantity).as_deref(), Some("C"));
        assert_eq!(column(CanonicalField::UnitPrice).as_deref(), Some("D"));
        assert_eq!(column(CanonicalField::LineTotal).as_deref(), Some("E"));
        assert!(inference.ambiguous_fields.is_empty());
        for field in REQUIRED_FIELDS {
            assert!(inference.mapping(field).is_some_and(|mapping| mapping.confidence > 0.9));
        }
        assert_eq!(
            inference.column(&ColumnId("B".to_string())).map(|column| column.inferred_type),
            Some(ColumnType::Identifier)
        );
        // header plus one sample per column
        assert_eq!(evidence.len(), 10);
    }

    #[test]
    fn close_runner_up_marks_field_ambiguous() {
        let sheet = Sheet::new("Orders")
            .with_row(vec![Cell::text("Item Code"), Cell::text("Article No"), Cell::text("Qty")])
            .with_row(vec![Cell::text("A-1"), Cell::text("X-77"), Cell::number(3.0)]);
        let mut evidence = EvidenceStore::new();
        let outcome =
            infer_schema(&sheet, 0, &[1], &mut evidence, SETTINGS, &MappingOverrides::new());

        assert!(outcome.inference.ambiguous_fields.contains(&CanonicalField::Sku));
        let ranked: Vec<&str> = outcome
            .inference
            .candidates
            .get(&CanonicalField::Sku)
            .map(|list| list.iter().take(2).map(|candidate| candidate.column_id.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(ranked, vec!["A", "B"]);
    }

    #[test]
    fn overrides_take_precedence_and_clear_ambiguity() {
        let sheet = Sheet::new("Orders")
            .with_row(vec![Cell::text("Item Code"), Cell::text("Article No"), Cell::text("Qty")])
            .with_row(vec![Cell::text("A-1"), Cell::text("X-77"), Cell::number(3.0)]);
        let mut overrides = MappingOverrides::new();
        overrides.insert(
            CanonicalField::Sku,
            (ColumnId("B".to_string()), MappingMethod::ReviewerConsensus),
        );
        let mut evidence = EvidenceStore::new();
        let outcome = infer_schema(&sheet, 0, &[1], &mut evidence, SETTINGS, &overrides);

        let mapping = outcome.inference.mapping(CanonicalField::Sku).expect("sku mapping");
        assert_eq!(mapping.column_id.as_str(), "B");
        assert_eq!(mapping.method, MappingMethod::ReviewerConsensus);
        assert!(outcome.inference.ambiguous_fields.is_empty());
    }
}
