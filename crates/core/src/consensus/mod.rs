pub mod aggregate;
pub mod calibration;
pub mod pack;
pub mod routing;
pub mod vote;
pub mod weights;

use serde::{Deserialize, Serialize};

pub use aggregate::{
    CandidateTally, Classification, ConsensusAggregator, ConsensusResult, ConsensusThresholds,
    Disagreement, FieldConsensus,
};
pub use pack::{EvidencePack, EvidencePackBuilder, PackCandidate, PackLimits};
pub use routing::{EntityMatch, EntityResolution, RouteReason, RoutingDecision, RoutingPolicy};
pub use vote::{
    parse_response, validate_response, AbstainReason, FieldChoice, ReviewerId, ReviewerOutcome,
    ReviewerRequest, ReviewerResponse, ReviewerVote,
};
pub use weights::{WeightError, WeightStore, WeightTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Uniform,
    Weighted,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Weighted => "weighted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub committee_size: usize,
    pub selection: SelectionStrategy,
    /// Fixes reviewer selection; meant for tests and replays.
    pub selection_seed: Option<u64>,
    pub majority_threshold: f64,
    pub min_votes: usize,
    pub max_candidates: usize,
    pub max_samples_per_candidate: usize,
    pub max_sample_chars: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let thresholds = ConsensusThresholds::default();
        let limits = PackLimits::default();
        Self {
            committee_size: 3,
            selection: SelectionStrategy::Uniform,
            selection_seed: None,
            majority_threshold: thresholds.majority_threshold,
            min_votes: thresholds.min_votes,
            max_candidates: limits.max_candidates,
            max_samples_per_candidate: limits.max_samples_per_candidate,
            max_sample_chars: limits.max_sample_chars,
        }
    }
}

impl ConsensusConfig {
    pub fn thresholds(&self) -> ConsensusThresholds {
        ConsensusThresholds { majority_threshold: self.majority_threshold, min_votes: self.min_votes }
    }

    pub fn pack_limits(&self) -> PackLimits {
        PackLimits {
            max_candidates: self.max_candidates,
            max_samples_per_candidate: self.max_samples_per_candidate,
            max_sample_chars: self.max_sample_chars,
        }
    }
}
