use serde::{Deserialize, Serialize};

use crate::domain::evidence::EvidenceId;

/// Ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Blocker,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Blocker => "blocker",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InputTooLarge,
    UnreadableWorkbook,
    FormulaDetected,
    NoUsableSheet,
    HeaderNotFound,
    RequiredFieldUnmapped,
    MappingAmbiguous,
    UnparseableNumber,
    MixedNumericConvention,
    IdentifierChecksumFailed,
    MissingSku,
    MissingQuantity,
    NegativeQuantity,
    NoLineItems,
    LineTotalMismatch,
    SubtotalMismatch,
    TotalMismatch,
    AmountOverflow,
    CustomerUnresolved,
    MultipleCustomers,
    ManualCorrection,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputTooLarge => "input_too_large",
            Self::UnreadableWorkbook => "unreadable_workbook",
            Self::FormulaDetected => "formula_detected",
            Self::NoUsableSheet => "no_usable_sheet",
            Self::HeaderNotFound => "header_not_found",
            Self::RequiredFieldUnmapped => "required_field_unmapped",
            Self::MappingAmbiguous => "mapping_ambiguous",
            Self::UnparseableNumber => "unparseable_number",
            Self::MixedNumericConvention => "mixed_numeric_convention",
            Self::IdentifierChecksumFailed => "identifier_checksum_failed",
            Self::MissingSku => "missing_sku",
            Self::MissingQuantity => "missing_quantity",
            Self::NegativeQuantity => "negative_quantity",
            Self::NoLineItems => "no_line_items",
            Self::LineTotalMismatch => "line_total_mismatch",
            Self::SubtotalMismatch => "subtotal_mismatch",
            Self::TotalMismatch => "total_mismatch",
            Self::AmountOverflow => "amount_overflow",
            Self::CustomerUnresolved => "customer_unresolved",
            Self::MultipleCustomers => "multiple_customers",
            Self::ManualCorrection => "manual_correction",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::InputTooLarge
            | Self::UnreadableWorkbook
            | Self::FormulaDetected
            | Self::NoUsableSheet => Severity::Blocker,
            Self::HeaderNotFound
            | Self::RequiredFieldUnmapped
            | Self::UnparseableNumber
            | Self::MissingSku
            | Self::MissingQuantity
            | Self::NoLineItems => Severity::Error,
            Self::IdentifierChecksumFailed
            | Self::NegativeQuantity
            | Self::LineTotalMismatch
            | Self::SubtotalMismatch
            | Self::TotalMismatch
            | Self::AmountOverflow
            | Self::MultipleCustomers => Severity::Warning,
            Self::MappingAmbiguous
            | Self::MixedNumericConvention
            | Self::CustomerUnresolved
            | Self::ManualCorrection => Severity::Info,
        }
    }

    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Self::InputTooLarge => Some("Split the order into smaller workbooks and upload again."),
            Self::UnreadableWorkbook => Some("Re-export the file as .xlsx and upload again."),
            Self::FormulaDetected => {
                Some("Paste the sheet as values only (no formulas) and upload again.")
            }
            Self::NoUsableSheet => Some("Make sure one sheet holds the order lines as a table."),
            Self::HeaderNotFound => Some("Add a header row naming each column."),
            Self::RequiredFieldUnmapped => Some("Pick the column holding this field."),
            Self::UnparseableNumber => Some("Correct the number in the highlighted cell."),
            Self::IdentifierChecksumFailed => Some("Check the product code for typos."),
            Self::MissingSku => Some("Fill in the product code for this line."),
            Self::MissingQuantity => Some("Fill in the quantity for this line."),
            Self::NoLineItems => Some("Add at least one order line below the header."),
            Self::LineTotalMismatch | Self::SubtotalMismatch | Self::TotalMismatch => {
                Some("Confirm the amounts; the sheet's own arithmetic does not add up.")
            }
            Self::AmountOverflow => {
                Some("Check the highlighted amounts; they are implausibly large.")
            }
            Self::CustomerUnresolved => Some("Tell us which customer this order is for."),
            Self::MultipleCustomers => Some("Confirm which customer this order belongs to."),
            Self::MappingAmbiguous
            | Self::MixedNumericConvention
            | Self::NegativeQuantity
            | Self::ManualCorrection => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
    pub evidence: Vec<EvidenceId>,
    pub suggested_action: Option<String>,
}

impl Issue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
            evidence: Vec::new(),
            suggested_action: code.suggested_action().map(str::to_string),
        }
    }

    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = EvidenceId>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

/// Append-only issue list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_blocker(&self) -> bool {
        self.issues.iter().any(|issue| issue.severity == Severity::Blocker)
    }

    pub fn at_least(&self, severity: Severity) -> Vec<&Issue> {
        self.issues.iter().filter(|issue| issue.severity >= severity).collect()
    }

    pub fn with_code(&self, code: IssueCode) -> Vec<&Issue> {
        self.issues.iter().filter(|issue| issue.code == code).collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|issue| issue.severity == severity).count()
    }
}
