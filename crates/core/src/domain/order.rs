use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::column::SchemaInference;
use crate::domain::evidence::{EvidenceId, EvidenceStore};
use crate::domain::field::CanonicalField;
use crate::domain::issue::{Issue, IssueCode, IssueLog, Severity};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the caller knows about an upload before parsing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub case_id: CaseId,
    pub filename: String,
    pub source_hash: Option<String>,
    pub language_hint: Option<String>,
}

impl CaseMetadata {
    pub fn new(case_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            case_id: CaseId(case_id.into()),
            filename: filename.into(),
            source_hash: None,
            language_hint: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language_hint = Some(language.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    pub case_id: CaseId,
    pub filename: String,
    pub source_hash: String,
    pub language_hint: Option<String>,
    pub version: u32,
    pub parent_version: Option<u32>,
    pub sheet: Option<String>,
    /// Zero-based row index of the detected header.
    pub header_row: Option<u32>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Read from the sheet, not yet matched to a customer record.
    Extracted,
    Missing,
    Resolved,
    Ambiguous,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub name: Option<String>,
    pub status: ResolutionStatus,
    pub evidence: Vec<EvidenceId>,
}

impl CustomerRef {
    pub fn missing() -> Self {
        Self { name: None, status: ResolutionStatus::Missing, evidence: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue<T> {
    pub value: T,
    pub evidence: Vec<EvidenceId>,
}

impl<T> FieldValue<T> {
    pub fn new(value: T, evidence: EvidenceId) -> Self {
        Self { value, evidence: vec![evidence] }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Zero-based source row.
    pub row: u32,
    pub sku: Option<FieldValue<String>>,
    pub description: Option<FieldValue<String>>,
    pub quantity: Option<FieldValue<Decimal>>,
    pub unit_price: Option<FieldValue<Decimal>>,
    pub line_total: Option<FieldValue<Decimal>>,
    pub currency: Option<FieldValue<String>>,
    pub unit: Option<FieldValue<String>>,
}

impl LineItem {
    pub fn new(row: u32) -> Self {
        Self { row, ..Self::default() }
    }

    pub fn evidence_for(&self, field: CanonicalField) -> Option<&[EvidenceId]> {
        match field {
            CanonicalField::Sku => self.sku.as_ref().map(|value| value.evidence.as_slice()),
            CanonicalField::Description => {
                self.description.as_ref().map(|value| value.evidence.as_slice())
            }
            CanonicalField::Quantity => {
                self.quantity.as_ref().map(|value| value.evidence.as_slice())
            }
            CanonicalField::UnitPrice => {
                self.unit_price.as_ref().map(|value| value.evidence.as_slice())
            }
            CanonicalField::LineTotal => {
                self.line_total.as_ref().map(|value| value.evidence.as_slice())
            }
            CanonicalField::Currency => {
                self.currency.as_ref().map(|value| value.evidence.as_slice())
            }
            CanonicalField::Unit => self.unit.as_ref().map(|value| value.evidence.as_slice()),
            CanonicalField::Customer => None,
        }
    }

    /// Quantity times unit price when both are present.
    pub fn computed_total(&self) -> Option<Decimal> {
        let quantity = self.quantity.as_ref()?.value;
        let unit_price = self.unit_price.as_ref()?.value;
        quantity.checked_mul(unit_price)
    }

    /// The stated line total, falling back to quantity times unit price.
    pub fn effective_total(&self) -> Option<Decimal> {
        self.line_total.as_ref().map(|value| value.value).or_else(|| self.computed_total())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Option<FieldValue<Decimal>>,
    pub tax: Option<FieldValue<Decimal>>,
    pub total: Option<FieldValue<Decimal>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub sheet: f64,
    pub header: f64,
    pub mapping: f64,
    pub overall: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub metadata: OrderMetadata,
    pub customer: CustomerRef,
    pub line_items: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub evidence: EvidenceStore,
    pub schema: SchemaInference,
    pub confidence: ConfidenceBreakdown,
    pub issues: IssueLog,
}

impl CanonicalOrder {
    pub fn has_blocker(&self) -> bool {
        self.issues.has_blocker()
    }

    pub fn unresolved_issues(&self) -> Vec<&Issue> {
        self.issues.at_least(Severity::Error)
    }

    /// Serialized form with the extraction timestamp blanked, used to compare
    /// two parses of the same input.
    pub fn stable_json(&self) -> Result<String, serde_json::Error> {
        let mut copy = self.clone();
        copy.metadata.extracted_at = DateTime::<Utc>::UNIX_EPOCH;
        serde_json::to_string(&copy)
    }

    /// Builds the next version of this order with the correction applied.
    ///
    /// Validation findings are not carried over; the caller re-validates the
    /// derived order. Manually entered values carry no evidence cell and are
    /// flagged with a `manual_correction` issue instead.
    pub fn derive_version(
        &self,
        correction: &OrderCorrection,
        at: DateTime<Utc>,
    ) -> Result<CanonicalOrder, DomainError> {
        if self.has_blocker() {
            return Err(DomainError::InvalidCorrection(
                "orders stopped by a blocker cannot be corrected".to_string(),
            ));
        }

        let mut next = self.clone();
        next.metadata.version = self.metadata.version + 1;
        next.metadata.parent_version = Some(self.metadata.version);
        next.metadata.extracted_at = at;

        let mut edited_evidence = Vec::new();
        let mut carried = IssueLog::new();

        if let Some(resolution) = &correction.customer {
            let changed_name =
                resolution.name.is_some() && resolution.name != self.customer.name;
            if changed_name {
                carried.push(
                    Issue::new(
                        IssueCode::ManualCorrection,
                        format!("customer set by {}", correction.corrected_by),
                    )
                    .with_evidence(self.customer.evidence.iter().copied()),
                );
                edited_evidence.extend(self.customer.evidence.iter().copied());
                next.customer.evidence.clear();
                next.customer.name = resolution.name.clone();
            }
            next.customer.status = resolution.status;
        }

        for edit in &correction.line_edits {
            let line = next.line_items.get_mut(edit.line).ok_or_else(|| {
                DomainError::InvalidCorrection(format!("line {} does not exist", edit.line))
            })?;
            let previous = line.evidence_for(edit.field).map(<[EvidenceId]>::to_vec);
            apply_line_edit(line, edit)?;
            let previous = previous.unwrap_or_default();
            edited_evidence.extend(previous.iter().copied());
            carried.push(
                Issue::new(
                    IssueCode::ManualCorrection,
                    format!(
                        "{} on line {} set to `{}` by {}",
                        edit.field,
                        edit.line + 1,
                        edit.value,
                        correction.corrected_by
                    ),
                )
                .with_evidence(previous),
            );
        }

        let customer_corrected = correction.customer.is_some();
        let mut issues = IssueLog::new();
        issues.extend(
            self.issues
                .iter()
                .filter(|issue| {
                    !is_validation_finding(issue.code)
                        && issue.code != IssueCode::ManualCorrection
                        && !(customer_corrected && issue.code == IssueCode::MultipleCustomers)
                        && !(issue.code == IssueCode::UnparseableNumber
                            && issue.evidence.iter().any(|id| edited_evidence.contains(id)))
                })
                .cloned(),
        );
        issues.extend(self.issues.with_code(IssueCode::ManualCorrection).into_iter().cloned());
        issues.extend(carried.iter().cloned());
        next.issues = issues;

        Ok(next)
    }
}

fn is_validation_finding(code: IssueCode) -> bool {
    matches!(
        code,
        IssueCode::MissingSku
            | IssueCode::MissingQuantity
            | IssueCode::NegativeQuantity
            | IssueCode::NoLineItems
            | IssueCode::LineTotalMismatch
            | IssueCode::SubtotalMismatch
            | IssueCode::TotalMismatch
            | IssueCode::CustomerUnresolved
    )
}

fn apply_line_edit(line: &mut LineItem, edit: &LineEdit) -> Result<(), DomainError> {
    let text = || FieldValue { value: edit.value.trim().to_string(), evidence: Vec::new() };
    let number = || {
        Decimal::from_str(edit.value.trim())
            .map(|value| FieldValue { value, evidence: Vec::new() })
            .map_err(|_| {
                DomainError::InvalidCorrection(format!(
                    "`{}` is not a valid {} value",
                    edit.value, edit.field
                ))
            })
    };

    match edit.field {
        CanonicalField::Sku => line.sku = Some(text()),
        CanonicalField::Description => line.description = Some(text()),
        CanonicalField::Currency => line.currency = Some(text()),
        CanonicalField::Unit => line.unit = Some(text()),
        CanonicalField::Quantity => line.quantity = Some(number()?),
        CanonicalField::UnitPrice => line.unit_price = Some(number()?),
        CanonicalField::LineTotal => line.line_total = Some(number()?),
        CanonicalField::Customer => {
            return Err(DomainError::InvalidCorrection(
                "customer is corrected at order level".to_string(),
            ))
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerResolution {
    pub name: Option<String>,
    pub status: ResolutionStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub line: usize,
    pub field: CanonicalField,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCorrection {
    pub corrected_by: String,
    pub customer: Option<CustomerResolution>,
    pub line_edits: Vec<LineEdit>,
}
