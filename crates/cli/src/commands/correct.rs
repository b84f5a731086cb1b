use std::path::Path;

use orderly_core::config::AppConfig;
use orderly_core::{CanonicalOrder, ExtractionEngine, OrderCorrection};

use crate::commands::{read_json, CommandResult, EXIT_INPUT};

/// Applies an operator correction to an extracted order and prints the new
/// version.
pub fn run(config: &AppConfig, order_path: &Path, correction_path: &Path) -> CommandResult {
    let order: CanonicalOrder = match read_json("correct", order_path) {
        Ok(order) => order,
        Err(failure) => return failure,
    };
    let correction: OrderCorrection = match read_json("correct", correction_path) {
        Ok(correction) => correction,
        Err(failure) => return failure,
    };

    match ExtractionEngine::new(config.extraction.clone()).correct(&order, &correction) {
        Ok(corrected) => CommandResult::document("correct", &corrected),
        Err(error) => {
            let case_id = order.metadata.case_id.to_string();
            tracing::warn!(
                event_name = "extraction.correction.rejected",
                case_id = %case_id,
                correlation_id = %case_id,
                error = %error,
                "correction rejected"
            );
            CommandResult::rejected(
                "correct",
                "invalid_correction",
                error.into(),
                &case_id,
                EXIT_INPUT,
            )
        }
    }
}
