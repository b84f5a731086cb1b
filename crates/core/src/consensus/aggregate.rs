use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consensus::vote::{AbstainReason, ReviewerId, ReviewerOutcome};
use crate::consensus::weights::WeightTable;
use crate::domain::column::MappingMethod;
use crate::domain::field::{CanonicalField, ColumnId};
use crate::domain::order::CaseId;
use crate::extraction::schema::{MappingOverrides, REQUIRED_FIELDS};

const WEIGHT_EPSILON: f64 = 1e-9;

/// Agreement level, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    NoConsensus,
    Split,
    Majority,
    Unanimous,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConsensus => "no_consensus",
            Self::Split => "split",
            Self::Majority => "majority",
            Self::Unanimous => "unanimous",
        }
    }

    pub fn is_agreed(&self) -> bool {
        *self >= Self::Majority
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusThresholds {
    pub majority_threshold: f64,
    pub min_votes: usize,
}

impl Default for ConsensusThresholds {
    fn default() -> Self {
        Self { majority_threshold: 0.66, min_votes: 2 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub column_id: ColumnId,
    pub weight: f64,
    pub voters: Vec<ReviewerId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConsensus {
    pub field: CanonicalField,
    pub winner: Option<ColumnId>,
    pub win_share: f64,
    pub classification: Classification,
    pub voters: usize,
    /// Highest weight first; ties by column id.
    pub tallies: Vec<CandidateTally>,
    pub abstentions: BTreeMap<ReviewerId, AbstainReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub field: CanonicalField,
    pub classification: Classification,
    pub tallies: Vec<CandidateTally>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub case_id: CaseId,
    pub fields: BTreeMap<CanonicalField, FieldConsensus>,
    pub classification: Classification,
    pub disagreements: Vec<Disagreement>,
    pub overall_confidence: f64,
    pub weight_table_version: String,
}

impl ConsensusResult {
    pub fn field(&self, field: CanonicalField) -> Option<&FieldConsensus> {
        self.fields.get(&field)
    }

    /// Winners of fields that reached at least majority, as forced mappings
    /// for a re-extraction.
    pub fn agreed_overrides(&self) -> MappingOverrides {
        self.fields
            .values()
            .filter(|consensus| consensus.classification.is_agreed())
            .filter_map(|consensus| {
                consensus
                    .winner
                    .clone()
                    .map(|winner| (consensus.field, (winner, MappingMethod::ReviewerConsensus)))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConsensusAggregator {
    thresholds: ConsensusThresholds,
}

impl ConsensusAggregator {
    pub fn new(thresholds: ConsensusThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ConsensusThresholds {
        self.thresholds
    }

    /// Pure function of the outcomes, the table and the thresholds.
    pub fn aggregate(
        &self,
        case_id: &CaseId,
        fields: &[CanonicalField],
        outcomes: &[ReviewerOutcome],
        table: &WeightTable,
    ) -> ConsensusResult {
        let per_field: BTreeMap<CanonicalField, FieldConsensus> = fields
            .iter()
            .map(|field| (*field, self.field_consensus(*field, outcomes, table)))
            .collect();

        let required: Vec<&FieldConsensus> = per_field
            .values()
            .filter(|consensus| REQUIRED_FIELDS.contains(&consensus.field))
            .collect();
        let deciding: Vec<&FieldConsensus> =
            if required.is_empty() { per_field.values().collect() } else { required };
        let classification = deciding
            .iter()
            .map(|consensus| consensus.classification)
            .min()
            .unwrap_or(Classification::Unanimous);

        let overall_confidence = if per_field.is_empty() {
            1.0
        } else {
            per_field.values().map(|consensus| consensus.win_share).sum::<f64>()
                / per_field.len() as f64
        };

        let disagreements = per_field
            .values()
            .filter(|consensus| consensus.classification < Classification::Unanimous)
            .map(|consensus| Disagreement {
                field: consensus.field,
                classification: consensus.classification,
                tallies: consensus.tallies.clone(),
            })
            .collect();

        tracing::info!(
            event_name = "consensus.aggregated",
            case_id = %case_id,
            correlation_id = %case_id,
            classification = classification.as_str(),
            fields = per_field.len(),
            reviewers = outcomes.len(),
            weight_table_version = %table.version,
            overall_confidence,
            "reviewer votes aggregated"
        );

        ConsensusResult {
            case_id: case_id.clone(),
            fields: per_field,
            classification,
            disagreements,
            overall_confidence,
            weight_table_version: table.version.clone(),
        }
    }

    fn field_consensus(
        &self,
        field: CanonicalField,
        outcomes: &[ReviewerOutcome],
        table: &WeightTable,
    ) -> FieldConsensus {
        let mut by_column: BTreeMap<ColumnId, CandidateTally> = BTreeMap::new();
        let mut abstentions = BTreeMap::new();
        let mut voters = 0usize;

        for outcome in outcomes {
            let vote = match outcome {
                ReviewerOutcome::Vote(vote) => vote,
                ReviewerOutcome::Abstain { reviewer_id, reason, .. } => {
                    abstentions.insert(reviewer_id.clone(), *reason);
                    continue;
                }
            };
            if let Some(reason) = vote.abstentions.get(&field) {
                abstentions.insert(vote.reviewer_id.clone(), *reason);
                continue;
            }
            let Some(choice) = vote.choices.get(&field) else {
                continue;
            };
            voters += 1;
            let tally = by_column.entry(choice.column_id.clone()).or_insert_with(|| CandidateTally {
                column_id: choice.column_id.clone(),
                weight: 0.0,
                voters: Vec::new(),
            });
            tally.weight += table.weight(field, &vote.reviewer_id);
            tally.voters.push(vote.reviewer_id.clone());
        }

        let mut tallies: Vec<CandidateTally> = by_column.into_values().collect();
        tallies.sort_by(|left, right| {
            right.weight.total_cmp(&left.weight).then_with(|| left.column_id.cmp(&right.column_id))
        });
        let total: f64 = tallies.iter().map(|tally| tally.weight).sum();

        let leader = tallies.first();
        let tied = match (tallies.first(), tallies.get(1)) {
            (Some(first), Some(second)) => (first.weight - second.weight).abs() <= WEIGHT_EPSILON,
            _ => false,
        };
        let undecidable = voters < self.thresholds.min_votes || total <= WEIGHT_EPSILON || tied;

        let (winner, win_share, classification) = match leader {
            Some(leader) if !undecidable => {
                let share = leader.weight / total;
                let classification = if tallies.len() == 1 {
                    Classification::Unanimous
                } else if share + WEIGHT_EPSILON >= self.thresholds.majority_threshold {
                    Classification::Majority
                } else {
                    Classification::Split
                };
                (Some(leader.column_id.clone()), share, classification)
            }
            _ => (None, 0.0, Classification::NoConsensus),
        };

        FieldConsensus {
            field,
            winner,
            win_share,
            classification,
            voters,
            tallies,
            abstentions,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::{Classification, ConsensusAggregator, ConsensusThresholds};
    use crate::consensus::vote::{
        AbstainReason, FieldChoice, ReviewerId, ReviewerOutcome, ReviewerVote,
    };
    use crate::consensus::weights::WeightTable;
    use crate::domain::column::MappingMethod;
    use crate::domain::field::{CanonicalField, ColumnId};
    use crate::domain::order::CaseId;

    fn vote(reviewer: &str, picks: &[(CanonicalField, &str)]) -> ReviewerOutcome {
        let choices = picks
            .iter()
            .map(|(field, column)| {
                (
                    *field,
                    FieldChoice {
                        column_id: ColumnId(column.to_string()),
                        confidence: 0.9,
                        reasoning: None,
                    },
                )
            })
            .collect();
        ReviewerOutcome::Vote(ReviewerVote {
            reviewer_id: ReviewerId::from(reviewer),
            choices,
            abstentions: BTreeMap::new(),
            flags: Vec::new(),
            overall_confidence: 0.9,
            latency_ms: 10,
        })
    }

    fn sku_votes(columns: &[&str]) -> Vec<ReviewerOutcome> {
        columns
            .iter()
            .enumerate()
            .map(|(index, column)| vote(&format!("r{index}"), &[(CanonicalField::Sku, column)]))
            .collect()
    }

    fn run(outcomes: &[ReviewerOutcome]) -> super::ConsensusResult {
        ConsensusAggregator::default().aggregate(
            &CaseId("case-1".to_string()),
            &[CanonicalField::Sku],
            outcomes,
            &WeightTable::uniform(Utc::now()),
        )
    }

    #[test]
    fn two_of_three_is_majority_not_unanimous() {
        let result = run(&sku_votes(&["A", "A", "B"]));
        let sku = result.field(CanonicalField::Sku).expect("sku");

        assert_eq!(sku.winner, Some(ColumnId("A".to_string())));
        assert!((sku.win_share - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(sku.classification, Classification::Majority);
        assert_eq!(result.classification, Classification::Majority);
        assert_eq!(result.disagreements.len(), 1);
        assert_eq!(
            result.agreed_overrides().get(&CanonicalField::Sku),
            Some(&(ColumnId("A".to_string()), MappingMethod::ReviewerConsensus))
        );
    }

    #[test]
    fn classification_ladder() {
        assert_eq!(run(&sku_votes(&["A", "A", "A"])).classification, Classification::Unanimous);
        assert_eq!(run(&sku_votes(&["A", "B"])).classification, Classification::NoConsensus);
        assert_eq!(run(&sku_votes(&["A"])).classification, Classification::NoConsensus);
        assert_eq!(run(&sku_votes(&["A", "A", "B", "C", "D"])).classification, Classification::Split);
        assert!(run(&sku_votes(&["A", "B"])).field(CanonicalField::Sku).expect("sku").winner.is_none());
    }

    #[test]
    fn field_weights_change_the_winner() {
        let mut table = WeightTable::uniform(Utc::now());
        let mut sku = BTreeMap::new();
        sku.insert(ReviewerId::from("r2"), 3.0);
        table.weights.insert(CanonicalField::Sku, sku);

        let result = ConsensusAggregator::default().aggregate(
            &CaseId("case-1".to_string()),
            &[CanonicalField::Sku],
            &sku_votes(&["A", "A", "B"]),
            &table,
        );
        let sku = result.field(CanonicalField::Sku).expect("sku");
        assert_eq!(sku.winner, Some(ColumnId("B".to_string())));
        assert!((sku.win_share - 0.6).abs() < 1e-9);
        assert_eq!(sku.classification, Classification::Split);
        assert_eq!(result.weight_table_version, "uniform");
    }

    #[test]
    fn adding_agreement_never_weakens_the_winner() {
        let before = run(&sku_votes(&["A", "A", "B"]));
        let after = run(&sku_votes(&["A", "A", "B", "A"]));
        let share = |result: &super::ConsensusResult| {
            result.field(CanonicalField::Sku).map(|sku| sku.win_share).unwrap_or_default()
        };
        assert!(share(&after) >= share(&before));

        let without_dissent = run(&sku_votes(&["A", "A"]));
        assert!(without_dissent.classification >= before.classification);
    }

    #[test]
    fn abstentions_are_excluded_from_aggregation() {
        let mut outcomes = sku_votes(&["A", "A"]);
        outcomes.push(ReviewerOutcome::abstain(ReviewerId::from("slow"), AbstainReason::Timeout, 3000));
        let mut out_of_range = vote("r9", &[]);
        if let ReviewerOutcome::Vote(vote) = &mut out_of_range {
            vote.abstentions.insert(CanonicalField::Sku, AbstainReason::OutOfRange);
        }
        outcomes.push(out_of_range);

        let result = run(&outcomes);
        let sku = result.field(CanonicalField::Sku).expect("sku");
        assert_eq!(sku.classification, Classification::Unanimous);
        assert_eq!(sku.voters, 2);
        assert_eq!(sku.abstentions.len(), 2);
        assert_eq!(sku.abstentions[&ReviewerId::from("r9")], AbstainReason::OutOfRange);
    }

    #[test]
    fn case_level_uses_required_fields_first() {
        let outcomes = vec![
            vote("r0", &[(CanonicalField::Sku, "A"), (CanonicalField::Unit, "C")]),
            vote("r1", &[(CanonicalField::Sku, "A"), (CanonicalField::Unit, "D")]),
        ];
        let result = ConsensusAggregator::new(ConsensusThresholds::default()).aggregate(
            &CaseId("case-1".to_string()),
            &[CanonicalField::Sku, CanonicalField::Unit],
            &outcomes,
            &WeightTable::uniform(Utc::now()),
        );
        assert_eq!(result.classification, Classification::Unanimous);
        assert!((result.overall_confidence - 0.5).abs() < 1e-9);
    }
}
