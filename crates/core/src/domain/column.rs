use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::evidence::EvidenceId;
use crate::domain::field::{CanonicalField, ColumnId};

pub const MAX_COLUMN_SAMPLES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Empty,
    Integer,
    Decimal,
    Text,
    Identifier,
    Date,
    Boolean,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalSeparator {
    Dot,
    Comma,
}

impl DecimalSeparator {
    pub fn as_char(&self) -> char {
        match self {
            Self::Dot => '.',
            Self::Comma => ',',
        }
    }

    pub fn grouping_char(&self) -> char {
        match self {
            Self::Dot => ',',
            Self::Comma => '.',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigitScript {
    Ascii,
    ArabicIndic,
    ExtendedArabicIndic,
    Devanagari,
    FullWidth,
}

/// Numeric writing convention detected once per column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericConvention {
    pub decimal_separator: DecimalSeparator,
    pub digit_script: DigitScript,
}

impl Default for NumericConvention {
    fn default() -> Self {
        Self { decimal_separator: DecimalSeparator::Dot, digit_script: DigitScript::Ascii }
    }
}

/// A source column considered during one parse attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateColumn {
    pub id: ColumnId,
    pub index: u32,
    pub header: String,
    /// At most [`MAX_COLUMN_SAMPLES`] display values from the data rows.
    pub samples: Vec<String>,
    pub inferred_type: ColumnType,
    pub type_confidence: f64,
    pub convention: NumericConvention,
    /// Header cell first, then the sampled cells.
    pub evidence: Vec<EvidenceId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    ExactSynonym,
    FuzzySynonym,
    TypeOnly,
    ReviewerConsensus,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub field: CanonicalField,
    pub column_id: ColumnId,
    pub confidence: f64,
    pub method: MappingMethod,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub column_id: ColumnId,
    pub score: f64,
    pub header_score: f64,
    pub type_score: f64,
}

/// What schema inference saw and decided; kept on the order for review.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInference {
    pub columns: Vec<CandidateColumn>,
    pub mappings: Vec<ColumnMapping>,
    /// Best candidates per field, highest score first.
    pub candidates: BTreeMap<CanonicalField, Vec<ScoredCandidate>>,
    pub ambiguous_fields: Vec<CanonicalField>,
    pub unmapped_fields: Vec<CanonicalField>,
}

impl SchemaInference {
    pub fn mapping(&self, field: CanonicalField) -> Option<&ColumnMapping> {
        self.mappings.iter().find(|mapping| mapping.field == field)
    }

    pub fn column(&self, id: &ColumnId) -> Option<&CandidateColumn> {
        self.columns.iter().find(|column| &column.id == id)
    }

    pub fn column_for(&self, field: CanonicalField) -> Option<&CandidateColumn> {
        self.mapping(field).and_then(|mapping| self.column(&mapping.column_id))
    }
}
