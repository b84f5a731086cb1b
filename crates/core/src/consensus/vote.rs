use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consensus::pack::EvidencePack;
use crate::domain::field::{CanonicalField, ColumnId};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(pub String);

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReviewerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Wire request sent to a reviewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewerRequest {
    pub case_id: String,
    pub candidate_headers: Vec<String>,
    pub sample_values: BTreeMap<String, Vec<String>>,
    pub constraints: Vec<String>,
}

/// Wire response expected back. Unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewerResponse {
    pub mappings: Vec<ResponseMapping>,
    #[serde(default)]
    pub issues: Vec<ResponseIssue>,
    pub overall_confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseMapping {
    pub field: String,
    pub selected_column_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseIssue {
    pub code: String,
    pub severity: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    Timeout,
    Transport,
    Malformed,
    OutOfRange,
    Disabled,
}

impl AbstainReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Malformed => "malformed",
            Self::OutOfRange => "out_of_range",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChoice {
    pub column_id: ColumnId,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewerVote {
    pub reviewer_id: ReviewerId,
    pub choices: BTreeMap<CanonicalField, FieldChoice>,
    /// Fields this reviewer answered but whose answer was thrown out.
    pub abstentions: BTreeMap<CanonicalField, AbstainReason>,
    pub flags: Vec<String>,
    pub overall_confidence: f64,
    pub latency_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewerOutcome {
    Vote(ReviewerVote),
    Abstain { reviewer_id: ReviewerId, reason: AbstainReason, latency_ms: u64 },
}

impl ReviewerOutcome {
    pub fn abstain(reviewer_id: ReviewerId, reason: AbstainReason, latency_ms: u64) -> Self {
        Self::Abstain { reviewer_id, reason, latency_ms }
    }

    pub fn reviewer_id(&self) -> &ReviewerId {
        match self {
            Self::Vote(vote) => &vote.reviewer_id,
            Self::Abstain { reviewer_id, .. } => reviewer_id,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            Self::Vote(vote) => vote.latency_ms,
            Self::Abstain { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn vote(&self) -> Option<&ReviewerVote> {
        match self {
            Self::Vote(vote) => Some(vote),
            Self::Abstain { .. } => None,
        }
    }

    pub fn abstain_reason(&self) -> Option<AbstainReason> {
        match self {
            Self::Vote(_) => None,
            Self::Abstain { reason, .. } => Some(*reason),
        }
    }
}

fn valid_confidence(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Parses raw reviewer output, then checks it against the pack.
pub fn parse_response(
    reviewer_id: ReviewerId,
    pack: &EvidencePack,
    raw: &str,
    latency_ms: u64,
) -> ReviewerOutcome {
    match serde_json::from_str::<ReviewerResponse>(raw) {
        Ok(response) => validate_response(reviewer_id, pack, &response, latency_ms),
        Err(error) => {
            tracing::warn!(
                event_name = "consensus.vote.malformed",
                case_id = %pack.case_id,
                reviewer_id = %reviewer_id,
                error = %error,
                "reviewer response did not match the wire schema"
            );
            ReviewerOutcome::abstain(reviewer_id, AbstainReason::Malformed, latency_ms)
        }
    }
}

/// Turns a decoded response into a vote. Structural problems void the whole
/// response; a column id outside the pack voids only that field.
pub fn validate_response(
    reviewer_id: ReviewerId,
    pack: &EvidencePack,
    response: &ReviewerResponse,
    latency_ms: u64,
) -> ReviewerOutcome {
    let malformed = |detail: String| {
        tracing::warn!(
            event_name = "consensus.vote.malformed",
            case_id = %pack.case_id,
            reviewer_id = %reviewer_id,
            detail = %detail,
            "reviewer response rejected"
        );
        ReviewerOutcome::abstain(reviewer_id.clone(), AbstainReason::Malformed, latency_ms)
    };

    if !valid_confidence(response.overall_confidence) {
        return malformed(format!("overall_confidence {} out of range", response.overall_confidence));
    }

    let mut seen: BTreeSet<CanonicalField> = BTreeSet::new();
    let mut choices = BTreeMap::new();
    let mut abstentions = BTreeMap::new();
    for mapping in &response.mappings {
        let field = match CanonicalField::from_str(&mapping.field) {
            Ok(field) => field,
            Err(error) => return malformed(error),
        };
        if !seen.insert(field) {
            return malformed(format!("field {field} answered twice"));
        }
        if !valid_confidence(mapping.confidence) {
            return malformed(format!("confidence {} out of range", mapping.confidence));
        }
        if !pack.is_under_review(field) {
            continue;
        }

        let column_id = ColumnId(mapping.selected_column_id.trim().to_string());
        if !pack.contains(&column_id) {
            tracing::warn!(
                event_name = "consensus.vote.out_of_range",
                case_id = %pack.case_id,
                reviewer_id = %reviewer_id,
                field = %field,
                column_id = %column_id,
                "reviewer chose a column outside the evidence pack"
            );
            abstentions.insert(field, AbstainReason::OutOfRange);
            continue;
        }
        choices.insert(
            field,
            FieldChoice {
                column_id,
                confidence: mapping.confidence,
                reasoning: mapping.reasoning.clone(),
            },
        );
    }

    ReviewerOutcome::Vote(ReviewerVote {
        reviewer_id,
        choices,
        abstentions,
        flags: response.issues.iter().map(|issue| issue.code.clone()).collect(),
        overall_confidence: response.overall_confidence,
        latency_ms,
    })
}
