//! Deterministic spreadsheet-to-order extraction.
//!
//! Stages run in order and stop at the first blocker: decode, formula scan,
//! sheet selection, header detection, schema inference, row extraction,
//! validation.

pub mod header;
pub mod lexicon;
pub mod normalize;
pub mod rows;
pub mod scanner;
pub mod schema;
pub mod validate;
pub mod workbook;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::column::SchemaInference;
use crate::domain::evidence::EvidenceStore;
use crate::domain::issue::{Issue, IssueCode, IssueLog};
use crate::domain::order::{
    CanonicalOrder, CaseMetadata, ConfidenceBreakdown, CustomerRef, DocumentTotals,
    OrderCorrection, OrderMetadata,
};
use crate::errors::DomainError;

use self::schema::{infer_schema, SchemaSettings, REQUIRED_FIELDS};
use self::validate::{validate, Tolerance};
use self::workbook::{decode, source_hash, DecodeError, Workbook};

pub use self::schema::MappingOverrides;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_input_bytes: usize,
    pub max_formula_refs: usize,
    pub sheet_score_floor: f64,
    pub header_scan_rows: u32,
    pub header_score_floor: f64,
    pub mapping_floor: f64,
    pub ambiguity_margin: f64,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    pub confidence_weights: ConfidenceWeights,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub sheet: f64,
    pub header: f64,
    pub mapping: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self { sheet: 0.2, header: 0.3, mapping: 0.5 }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 10 * 1024 * 1024,
            max_formula_refs: 10,
            sheet_score_floor: 0.3,
            header_scan_rows: 20,
            header_score_floor: 0.35,
            mapping_floor: 0.45,
            ambiguity_margin: 0.1,
            abs_tolerance: 0.01,
            rel_tolerance: 0.005,
            confidence_weights: ConfidenceWeights::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn tolerance(&self) -> Tolerance {
        let fallback = Tolerance::default();
        Tolerance {
            abs: Decimal::from_f64(self.abs_tolerance).unwrap_or(fallback.abs),
            rel: Decimal::from_f64(self.rel_tolerance).unwrap_or(fallback.rel),
        }
    }

    fn schema_settings(&self) -> SchemaSettings {
        SchemaSettings { mapping_floor: self.mapping_floor, ambiguity_margin: self.ambiguity_margin }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExtractionEngine {
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn extract(&self, bytes: &[u8], metadata: &CaseMetadata) -> CanonicalOrder {
        self.extract_with(bytes, metadata, &MappingOverrides::new())
    }

    /// Decodes and extracts, forcing the given field-to-column assignments.
    pub fn extract_with(
        &self,
        bytes: &[u8],
        metadata: &CaseMetadata,
        overrides: &MappingOverrides,
    ) -> CanonicalOrder {
        let hash = metadata.source_hash.clone().unwrap_or_else(|| source_hash(bytes));
        match decode(bytes, self.config.max_input_bytes) {
            Ok(workbook) => self.extract_workbook(&workbook, metadata, hash, overrides),
            Err(error) => {
                let code = match error {
                    DecodeError::TooLarge { .. } => IssueCode::InputTooLarge,
                    DecodeError::Open(_) | DecodeError::Sheet { .. } => {
                        IssueCode::UnreadableWorkbook
                    }
                };
                tracing::warn!(
                    event_name = "extraction.decode.failed",
                    case_id = %metadata.case_id,
                    correlation_id = %metadata.case_id,
                    error = %error,
                    "workbook could not be decoded"
                );
                let mut order = empty_order(metadata, hash, Utc::now());
                order.issues.push(Issue::new(code, error.to_string()));
                order
            }
        }
    }

    /// Runs the pipeline on an already decoded workbook.
    pub fn extract_workbook(
        &self,
        workbook: &Workbook,
        metadata: &CaseMetadata,
        source_hash: String,
        overrides: &MappingOverrides,
    ) -> CanonicalOrder {
        let mut order = empty_order(metadata, source_hash, Utc::now());

        let (formulas, formula_count) = scanner::find_formulas(workbook, self.config.max_formula_refs);
        if formula_count > 0 {
            let evidence: Vec<_> = formulas
                .iter()
                .map(|hit| {
                    let cached = workbook
                        .sheet(&hit.sheet)
                        .and_then(|sheet| sheet.cell(hit.address.row, hit.address.col))
                        .map(|cell| cell.display())
                        .unwrap_or_default();
                    order.evidence.record(
                        &hit.sheet,
                        hit.address,
                        format!("={}", hit.formula.trim_start_matches('=')),
                        cached,
                        None,
                    )
                })
                .collect();
            let listed: Vec<String> =
                formulas.iter().map(|hit| format!("{}!{}", hit.sheet, hit.address)).collect();
            order.issues.push(
                Issue::new(
                    IssueCode::FormulaDetected,
                    format!(
                        "workbook contains {formula_count} formula cell(s), first at {}",
                        listed.join(", ")
                    ),
                )
                .with_evidence(evidence),
            );
            tracing::warn!(
                event_name = "extraction.formula.blocked",
                case_id = %metadata.case_id,
                correlation_id = %metadata.case_id,
                formula_count,
                "formulas present; extraction stopped"
            );
            return order;
        }

        let (selected, _) = scanner::select_sheet(workbook, self.config.sheet_score_floor);
        let Some(selected) = selected else {
            order.issues.push(Issue::new(
                IssueCode::NoUsableSheet,
                "no visible sheet looks like an order table",
            ));
            return order;
        };
        let Some(sheet) = workbook.sheets.get(selected.index) else {
            order.issues.push(Issue::new(IssueCode::NoUsableSheet, "selected sheet is missing"));
            return order;
        };
        order.metadata.sheet = Some(sheet.name.clone());
        order.confidence.sheet = selected.score.min(1.0);

        let Some(detection) = header::locate_header(
            sheet,
            self.config.header_scan_rows,
            self.config.header_score_floor,
        ) else {
            order.issues.push(Issue::new(IssueCode::NoUsableSheet, "selected sheet is empty"));
            return order;
        };
        if !detection.found {
            order.issues.push(Issue::new(
                IssueCode::HeaderNotFound,
                format!("no header row found; using row {} as best effort", detection.row + 1),
            ));
        }
        order.metadata.header_row = Some(detection.row);
        order.confidence.header = detection.score.min(1.0);

        let data_rows = rows::data_rows(sheet, detection.row);
        let outcome = infer_schema(
            sheet,
            detection.row,
            &data_rows,
            &mut order.evidence,
            self.config.schema_settings(),
            overrides,
        );
        self.record_schema_issues(&outcome, &mut order.issues);
        order.schema = outcome.inference;

        let extraction =
            rows::extract_rows(sheet, detection.row, &order.schema, &mut order.evidence, &mut order.issues);
        order.line_items = extraction.line_items;
        order.totals = extraction.totals;
        order.customer = extraction.customer;

        order.confidence.mapping = mapping_confidence(&order.schema);
        order.confidence.overall = self.overall_confidence(&order.confidence);

        let findings = validate(&order, self.config.tolerance());
        order.issues.extend(findings);

        tracing::info!(
            event_name = "extraction.completed",
            case_id = %metadata.case_id,
            correlation_id = %metadata.case_id,
            sheet = %sheet.name,
            header_row = detection.row,
            line_items = order.line_items.len(),
            issues = order.issues.len(),
            ambiguous_fields = order.schema.ambiguous_fields.len(),
            confidence = order.confidence.overall,
            "extraction finished"
        );
        order
    }

    /// Re-extracts with reviewer-agreed mappings, producing the next version
    /// of `parent`.
    pub fn rederive(
        &self,
        bytes: &[u8],
        parent: &CanonicalOrder,
        overrides: &MappingOverrides,
    ) -> CanonicalOrder {
        let metadata = CaseMetadata {
            case_id: parent.metadata.case_id.clone(),
            filename: parent.metadata.filename.clone(),
            source_hash: Some(parent.metadata.source_hash.clone()),
            language_hint: parent.metadata.language_hint.clone(),
        };
        let mut order = self.extract_with(bytes, &metadata, overrides);
        order.metadata.version = parent.metadata.version + 1;
        order.metadata.parent_version = Some(parent.metadata.version);
        order
    }

    /// Applies a manual correction as a new version and re-validates it.
    pub fn correct(
        &self,
        order: &CanonicalOrder,
        correction: &OrderCorrection,
    ) -> Result<CanonicalOrder, DomainError> {
        let mut next = order.derive_version(correction, Utc::now())?;
        let findings = validate(&next, self.config.tolerance());
        next.issues.extend(findings);
        tracing::info!(
            event_name = "extraction.correction.applied",
            case_id = %next.metadata.case_id,
            correlation_id = %next.metadata.case_id,
            version = next.metadata.version,
            corrected_by = %correction.corrected_by,
            "correction produced a new order version"
        );
        Ok(next)
    }

    fn record_schema_issues(&self, outcome: &schema::SchemaOutcome, issues: &mut IssueLog) {
        let inference = &outcome.inference;
        for field in REQUIRED_FIELDS {
            if inference.mapping(field).is_none() {
                issues.push(Issue::new(
                    IssueCode::RequiredFieldUnmapped,
                    format!("no column could be matched to {field}"),
                ));
            }
        }
        for field in &inference.ambiguous_fields {
            let evidence = inference
                .candidates
                .get(field)
                .into_iter()
                .flatten()
                .filter_map(|candidate| inference.column(&candidate.column_id))
                .filter_map(|column| column.evidence.first().copied());
            issues.push(
                Issue::new(
                    IssueCode::MappingAmbiguous,
                    format!("{field} could come from more than one column"),
                )
                .with_evidence(evidence),
            );
        }
        for column_id in &outcome.mixed_columns {
            let evidence =
                inference.column(column_id).map(|column| column.evidence.clone()).unwrap_or_default();
            issues.push(
                Issue::new(
                    IssueCode::MixedNumericConvention,
                    format!("column {column_id} mixes decimal separators"),
                )
                .with_evidence(evidence),
            );
        }
    }

    fn overall_confidence(&self, confidence: &ConfidenceBreakdown) -> f64 {
        let weights = self.config.confidence_weights;
        weights.sheet * confidence.sheet
            + weights.header * confidence.header
            + weights.mapping * confidence.mapping
    }
}

/// Mean mapping confidence over required fields; unmapped counts as zero.
pub fn mapping_confidence(schema: &SchemaInference) -> f64 {
    let sum: f64 = REQUIRED_FIELDS
        .iter()
        .map(|field| schema.mapping(*field).map(|mapping| mapping.confidence.min(1.0)).unwrap_or(0.0))
        .sum();
    sum / REQUIRED_FIELDS.len() as f64
}

fn empty_order(metadata: &CaseMetadata, source_hash: String, at: DateTime<Utc>) -> CanonicalOrder {
    CanonicalOrder {
        metadata: OrderMetadata {
            case_id: metadata.case_id.clone(),
            filename: metadata.filename.clone(),
            source_hash,
            language_hint: metadata.language_hint.clone(),
            version: 1,
            parent_version: None,
            sheet: None,
            header_row: None,
            extracted_at: at,
        },
        customer: CustomerRef::missing(),
        line_items: Vec::new(),
        totals: DocumentTotals::default(),
        evidence: EvidenceStore::new(),
        schema: SchemaInference::default(),
        confidence: ConfidenceBreakdown::default(),
        issues: IssueLog::new(),
    }
}
