//! Parallel reviewer fan-out.
//!
//! Every selected reviewer runs on its own task under its own timeout. The
//! round waits until each call has settled one way or another; a failure or
//! timeout becomes an abstention for that reviewer and never holds up the
//! others.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use orderly_core::consensus::{
    parse_response, AbstainReason, EvidencePack, ReviewerId, ReviewerOutcome,
};

use crate::pool::PoolMember;

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs one round. Outcomes come back in the order of `members`.
pub async fn convene(members: &[PoolMember], pack: Arc<EvidencePack>) -> Vec<ReviewerOutcome> {
    let calls = members.iter().map(|member| {
        let member = member.clone();
        let pack = Arc::clone(&pack);
        async move { ask(member, pack).await }
    });
    let outcomes = join_all(calls).await;

    let abstained = outcomes.iter().filter(|outcome| outcome.vote().is_none()).count();
    tracing::info!(
        event_name = "consensus.committee.settled",
        case_id = %pack.case_id,
        correlation_id = %pack.case_id,
        reviewers = outcomes.len(),
        abstained,
        "committee round settled"
    );
    outcomes
}

async fn ask(member: PoolMember, pack: Arc<EvidencePack>) -> ReviewerOutcome {
    let reviewer_id = member.id().clone();
    let started = Instant::now();

    if !member.is_enabled() {
        return abstain(&pack, reviewer_id, AbstainReason::Disabled, 0, "reviewer disabled");
    }

    let reviewer = Arc::clone(&member.reviewer);
    let task_pack = Arc::clone(&pack);
    // The handle is dropped on timeout, which detaches the task; an in-flight
    // call finishes on its own and its answer is discarded.
    let handle = tokio::spawn(async move { reviewer.review(&task_pack).await });

    match tokio::time::timeout(member.timeout, handle).await {
        Ok(Ok(Ok(raw))) => {
            let outcome = parse_response(reviewer_id, &pack, &raw, elapsed_ms(started));
            if let Some(vote) = outcome.vote() {
                for (field, reason) in &vote.abstentions {
                    tracing::warn!(
                        event_name = "consensus.reviewer.field_abstained",
                        case_id = %pack.case_id,
                        reviewer_id = %vote.reviewer_id,
                        field = %field,
                        reason = reason.as_str(),
                        "reviewer abstained on field"
                    );
                }
            }
            outcome
        }
        Ok(Ok(Err(error))) => {
            let reason = error.abstain_reason();
            abstain(&pack, reviewer_id, reason, elapsed_ms(started), &error.to_string())
        }
        Ok(Err(join_error)) => abstain(
            &pack,
            reviewer_id,
            AbstainReason::Transport,
            elapsed_ms(started),
            &format!("reviewer task failed: {join_error}"),
        ),
        Err(_) => abstain(
            &pack,
            reviewer_id,
            AbstainReason::Timeout,
            elapsed_ms(started),
            &format!("no answer within {} ms", member.timeout.as_millis()),
        ),
    }
}

fn abstain(
    pack: &EvidencePack,
    reviewer_id: ReviewerId,
    reason: AbstainReason,
    latency_ms: u64,
    detail: &str,
) -> ReviewerOutcome {
    tracing::warn!(
        event_name = "consensus.reviewer.abstained",
        case_id = %pack.case_id,
        correlation_id = %pack.case_id,
        reviewer_id = %reviewer_id,
        reason = reason.as_str(),
        latency_ms,
        detail = %detail,
        "reviewer abstained"
    );
    ReviewerOutcome::abstain(reviewer_id, reason, latency_ms)
}
