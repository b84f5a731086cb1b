use std::sync::Arc;

use orderly_agent::{CaseRuntime, ReviewerPool};
use orderly_core::audit::{InMemoryAuditSink, InMemoryCommitteeSink};
use orderly_core::config::AppConfig;
use orderly_core::ExtractionEngine;

use crate::commands::{
    active_weights, weights_failure, CommandResult, WorkbookInput, EXIT_CONFIG, EXIT_RUNTIME,
};

/// Runs the full pipeline against the configured reviewer pool and prints the
/// case outcome, committee record included.
pub fn run(config: &AppConfig, input: &WorkbookInput) -> CommandResult {
    let (bytes, metadata) = match input.read("review") {
        Ok(read) => read,
        Err(failure) => return failure,
    };
    let pool = match ReviewerPool::from_config(&config.reviewers) {
        Ok(pool) => pool,
        Err(error) => {
            return CommandResult::failure(
                "review",
                "reviewer_pool",
                format!("could not build reviewer pool: {error}"),
                EXIT_CONFIG,
            );
        }
    };
    let weights = match active_weights(&config.weights.active_path) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            return weights_failure("review", error, &metadata.case_id.to_string());
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "review",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let case_runtime = CaseRuntime::new(
        ExtractionEngine::new(config.extraction.clone()),
        config.consensus.clone(),
        pool,
        weights,
        Arc::new(InMemoryCommitteeSink::default()),
        Arc::new(InMemoryAuditSink::default()),
    );
    let outcome = runtime.block_on(case_runtime.process(&bytes, &metadata, &[]));
    CommandResult::document("review", &outcome)
}
