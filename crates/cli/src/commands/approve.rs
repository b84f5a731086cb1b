use std::path::Path;

use chrono::Utc;
use orderly_core::config::AppConfig;
use orderly_core::consensus::WeightTable;

use crate::commands::{weights_failure, CommandResult};

pub fn run(
    config: &AppConfig,
    candidate: &Path,
    approver: &str,
    out: Option<&Path>,
) -> CommandResult {
    let out = out.unwrap_or(config.weights.active_path.as_path());
    let correlation_id = candidate.display().to_string();
    let approved = WeightTable::load(candidate)
        .and_then(|table| table.approve(approver, Utc::now()))
        .and_then(|table| table.save(out).map(|()| table));
    let table = match approved {
        Ok(table) => table,
        Err(error) => return weights_failure("approve-weights", error, &correlation_id),
    };
    let checksum = match table.checksum() {
        Ok(checksum) => checksum,
        Err(error) => return weights_failure("approve-weights", error, &correlation_id),
    };

    tracing::info!(
        event_name = "consensus.weights.approved",
        version = %table.version,
        approver = %approver,
        path = %out.display(),
        checksum = %checksum,
        "weight table approved"
    );
    CommandResult::success(
        "approve-weights",
        format!(
            "weight table {} approved by {approver} and written to {} ({checksum})",
            table.version,
            out.display()
        ),
    )
}
