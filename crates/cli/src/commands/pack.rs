use chrono::Utc;
use orderly_core::config::AppConfig;
use orderly_core::{EvidencePackBuilder, ExtractionEngine};

use crate::commands::{CommandResult, WorkbookInput};

pub fn run(config: &AppConfig, input: &WorkbookInput) -> CommandResult {
    let (bytes, metadata) = match input.read("pack") {
        Ok(read) => read,
        Err(failure) => return failure,
    };
    let order = ExtractionEngine::new(config.extraction.clone()).extract(&bytes, &metadata);
    if order.has_blocker() {
        let codes: Vec<&str> =
            order.unresolved_issues().iter().map(|issue| issue.code.as_str()).collect();
        return CommandResult::success(
            "pack",
            format!("extraction blocked ({}); nothing to review", codes.join(", ")),
        );
    }

    match EvidencePackBuilder::new(config.consensus.pack_limits()).build(&order, Utc::now()) {
        Some(pack) => CommandResult::document("pack", &pack),
        None => CommandResult::success("pack", "every required field is settled; nothing to review"),
    }
}
