use serde::{Deserialize, Serialize};

use crate::consensus::aggregate::{Classification, ConsensusResult};
use crate::consensus::vote::ReviewerId;
use crate::domain::evidence::EvidenceCell;
use crate::domain::field::{CanonicalField, ColumnId};
use crate::domain::issue::{IssueCode, Severity};
use crate::domain::order::CanonicalOrder;
use crate::extraction::schema::REQUIRED_FIELDS;

/// How a downstream collaborator matched an extracted entity (customer,
/// product) to its own records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityMatch {
    Unique { id: String },
    Ambiguous { candidates: Vec<String> },
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityResolution {
    pub entity: String,
    pub result: EntityMatch,
}

impl EntityResolution {
    pub fn is_unambiguous(&self) -> bool {
        matches!(self.result, EntityMatch::Unique { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteReason {
    OpenIssue { code: IssueCode, severity: Severity },
    NoAgreement { field: CanonicalField, classification: Classification },
    RequiredFieldUnmapped { field: CanonicalField },
    UnresolvedEntity { entity: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvidence {
    pub column_id: ColumnId,
    pub header: String,
    pub weight: f64,
    pub voters: Vec<ReviewerId>,
    pub evidence: Vec<EvidenceCell>,
}

/// Everything a human needs to settle one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldReview {
    pub field: CanonicalField,
    pub classification: Classification,
    pub candidates: Vec<CandidateEvidence>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    AutoProceed,
    NeedsHuman { reasons: Vec<RouteReason>, review: Vec<FieldReview> },
}

impl RoutingDecision {
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::AutoProceed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoProceed => "auto_proceed",
            Self::NeedsHuman { .. } => "needs_human",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingPolicy;

impl RoutingPolicy {
    pub fn route(
        &self,
        order: &CanonicalOrder,
        consensus: Option<&ConsensusResult>,
        resolutions: &[EntityResolution],
    ) -> RoutingDecision {
        let mut reasons = Vec::new();

        for issue in order.issues.at_least(Severity::Error) {
            reasons.push(RouteReason::OpenIssue { code: issue.code, severity: issue.severity });
        }

        for field in REQUIRED_FIELDS {
            match consensus.and_then(|result| result.field(field)) {
                Some(reviewed) if !reviewed.classification.is_agreed() => {
                    reasons.push(RouteReason::NoAgreement {
                        field,
                        classification: reviewed.classification,
                    });
                }
                Some(_) => {}
                None if order.schema.mapping(field).is_none() => {
                    reasons.push(RouteReason::RequiredFieldUnmapped { field });
                }
                None => {}
            }
        }

        for resolution in resolutions.iter().filter(|resolution| !resolution.is_unambiguous()) {
            reasons.push(RouteReason::UnresolvedEntity { entity: resolution.entity.clone() });
        }

        let decision = if reasons.is_empty() {
            RoutingDecision::AutoProceed
        } else {
            let review = consensus.map(|result| field_reviews(order, result)).unwrap_or_default();
            RoutingDecision::NeedsHuman { reasons, review }
        };

        tracing::info!(
            event_name = "consensus.routing.decided",
            case_id = %order.metadata.case_id,
            correlation_id = %order.metadata.case_id,
            decision = decision.as_str(),
            version = order.metadata.version,
            "routing decided"
        );
        decision
    }
}

fn field_reviews(order: &CanonicalOrder, result: &ConsensusResult) -> Vec<FieldReview> {
    result
        .disagreements
        .iter()
        .map(|disagreement| FieldReview {
            field: disagreement.field,
            classification: disagreement.classification,
            candidates: disagreement
                .tallies
                .iter()
                .map(|tally| {
                    let column = order.schema.column(&tally.column_id);
                    CandidateEvidence {
                        column_id: tally.column_id.clone(),
                        header: column.map(|column| column.header.clone()).unwrap_or_default(),
                        weight: tally.weight,
                        voters: tally.voters.clone(),
                        evidence: column
                            .map(|column| order.evidence.resolve(&column.evidence))
                            .unwrap_or_default(),
                    }
                })
                .collect(),
        })
        .collect()
}
