use orderly_core::config::AppConfig;
use orderly_core::ExtractionEngine;

use crate::commands::{CommandResult, WorkbookInput};

pub fn run(config: &AppConfig, input: &WorkbookInput) -> CommandResult {
    let (bytes, metadata) = match input.read("extract") {
        Ok(read) => read,
        Err(failure) => return failure,
    };
    let order = ExtractionEngine::new(config.extraction.clone()).extract(&bytes, &metadata);
    CommandResult::document("extract", &order)
}
