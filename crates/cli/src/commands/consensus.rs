use std::path::Path;

use orderly_core::config::AppConfig;
use orderly_core::consensus::{parse_response, ReviewerId, ReviewerOutcome, WeightStore};
use orderly_core::{ConsensusAggregator, EvidencePack};
use serde::Deserialize;
use serde_json::Value;

use crate::commands::{active_weights, read_json, weights_failure, CommandResult};

/// One recorded reviewer answer. The body is kept raw so a malformed answer
/// becomes an abstention instead of failing the command.
#[derive(Debug, Deserialize)]
pub struct RecordedVote {
    pub reviewer_id: ReviewerId,
    #[serde(default)]
    pub latency_ms: u64,
    pub response: Value,
}

pub fn run(
    config: &AppConfig,
    pack_path: &Path,
    votes_path: &Path,
    weights_path: Option<&Path>,
) -> CommandResult {
    let pack: EvidencePack = match read_json("consensus", pack_path) {
        Ok(pack) => pack,
        Err(failure) => return failure,
    };
    let votes: Vec<RecordedVote> = match read_json("consensus", votes_path) {
        Ok(votes) => votes,
        Err(failure) => return failure,
    };
    let store = match weights_path {
        Some(path) => WeightStore::load(path),
        None => active_weights(&config.weights.active_path),
    };
    let store = match store {
        Ok(store) => store,
        Err(error) => return weights_failure("consensus", error, &pack.case_id.to_string()),
    };

    let outcomes: Vec<ReviewerOutcome> = votes
        .iter()
        .map(|vote| {
            let raw = vote.response.to_string();
            parse_response(vote.reviewer_id.clone(), &pack, &raw, vote.latency_ms)
        })
        .collect();

    let table = store.current();
    let result = ConsensusAggregator::new(config.consensus.thresholds()).aggregate(
        &pack.case_id,
        &pack.fields,
        &outcomes,
        &table,
    );
    CommandResult::document("consensus", &result)
}
