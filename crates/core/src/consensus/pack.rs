use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::vote::ReviewerRequest;
use crate::domain::evidence::EvidenceId;
use crate::domain::field::{CanonicalField, ColumnId};
use crate::domain::order::{CanonicalOrder, CaseId};
use crate::extraction::schema::REQUIRED_FIELDS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackLimits {
    pub max_candidates: usize,
    pub max_samples_per_candidate: usize,
    pub max_sample_chars: usize,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self { max_candidates: 20, max_samples_per_candidate: 5, max_sample_chars: 64 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackCandidate {
    pub column_id: ColumnId,
    pub header: String,
    pub samples: Vec<String>,
    /// Source cells behind the header and samples, for human review later.
    pub evidence: Vec<EvidenceId>,
}

/// What reviewers are allowed to see about one case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidencePack {
    pub case_id: CaseId,
    pub language_hint: Option<String>,
    pub fields: Vec<CanonicalField>,
    pub candidates: Vec<PackCandidate>,
    pub constraints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EvidencePack {
    pub fn contains(&self, column_id: &ColumnId) -> bool {
        self.candidates.iter().any(|candidate| &candidate.column_id == column_id)
    }

    pub fn candidate(&self, column_id: &ColumnId) -> Option<&PackCandidate> {
        self.candidates.iter().find(|candidate| &candidate.column_id == column_id)
    }

    pub fn is_under_review(&self, field: CanonicalField) -> bool {
        self.fields.contains(&field)
    }

    pub fn to_request(&self) -> ReviewerRequest {
        ReviewerRequest {
            case_id: self.case_id.to_string(),
            candidate_headers: self
                .candidates
                .iter()
                .map(|candidate| format!("{}: {}", candidate.column_id, candidate.header))
                .collect(),
            sample_values: self
                .candidates
                .iter()
                .map(|candidate| (candidate.column_id.to_string(), candidate.samples.clone()))
                .collect::<BTreeMap<_, _>>(),
            constraints: self.constraints.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EvidencePackBuilder {
    limits: PackLimits,
}

impl EvidencePackBuilder {
    pub fn new(limits: PackLimits) -> Self {
        Self { limits }
    }

    /// Fields reviewers should decide: ambiguous mappings plus required
    /// fields nothing was mapped to.
    pub fn fields_under_review(order: &CanonicalOrder) -> Vec<CanonicalField> {
        let schema = &order.schema;
        let mut fields: BTreeSet<CanonicalField> = schema.ambiguous_fields.iter().copied().collect();
        for field in REQUIRED_FIELDS {
            if schema.mapping(field).is_none() {
                fields.insert(field);
            }
        }
        fields.into_iter().collect()
    }

    /// Builds a pack for the order's open mapping questions. Returns `None`
    /// when nothing needs review, the order is blocked, or no column is
    /// available to choose from.
    pub fn build(&self, order: &CanonicalOrder, at: DateTime<Utc>) -> Option<EvidencePack> {
        if order.has_blocker() {
            return None;
        }
        let fields = Self::fields_under_review(order);
        if fields.is_empty() {
            return None;
        }

        let schema = &order.schema;
        let mut wanted: BTreeSet<&ColumnId> = fields
            .iter()
            .filter_map(|field| schema.candidates.get(field))
            .flatten()
            .map(|candidate| &candidate.column_id)
            .collect();
        if wanted.is_empty() {
            wanted = schema.columns.iter().map(|column| &column.id).collect();
        }

        let candidates: Vec<PackCandidate> = schema
            .columns
            .iter()
            .filter(|column| wanted.contains(&column.id))
            .take(self.limits.max_candidates)
            .map(|column| PackCandidate {
                column_id: column.id.clone(),
                header: truncate(&column.header, self.limits.max_sample_chars),
                samples: column
                    .samples
                    .iter()
                    .take(self.limits.max_samples_per_candidate)
                    .map(|sample| truncate(sample, self.limits.max_sample_chars))
                    .collect(),
                evidence: column.evidence.clone(),
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let ids: Vec<&str> = candidates.iter().map(|candidate| candidate.column_id.as_str()).collect();
        let names: Vec<&str> = fields.iter().map(|field| field.as_str()).collect();
        let mut constraints = vec![
            format!("choose selected_column_id only from: {}", ids.join(", ")),
            format!("answer only for fields: {}", names.join(", ")),
            "omit a field instead of guessing".to_string(),
            "confidence must be between 0 and 1".to_string(),
        ];
        if let Some(language) = &order.metadata.language_hint {
            constraints.push(format!("headers are likely written in {language}"));
        }

        Some(EvidencePack {
            case_id: order.metadata.case_id.clone(),
            language_hint: order.metadata.language_hint.clone(),
            fields,
            candidates,
            constraints,
            created_at: at,
        })
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
