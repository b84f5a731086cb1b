use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use orderly_core::config::AppConfig;
use orderly_core::consensus::calibration::{calibrate, CalibrationCorpus, ReviewerTranscript};

use crate::commands::{read_json, weights_failure, CommandResult, EXIT_INPUT};

pub struct CalibrateArgs<'a> {
    pub corpus: &'a Path,
    pub transcripts: &'a Path,
    pub version: &'a str,
    pub out: &'a Path,
}

pub fn run(config: &AppConfig, args: &CalibrateArgs<'_>) -> CommandResult {
    let corpus: CalibrationCorpus = match read_json("calibrate", args.corpus) {
        Ok(corpus) => corpus,
        Err(failure) => return failure,
    };
    let transcripts = match load_transcripts(args.transcripts) {
        Ok(transcripts) => transcripts,
        Err(error) => {
            return CommandResult::failure("calibrate", "input", format!("{error:#}"), EXIT_INPUT);
        }
    };

    let report = match calibrate(
        &corpus,
        &transcripts,
        args.version,
        config.calibration.min_weight,
        Utc::now(),
    ) {
        Ok(report) => report,
        Err(error) => return weights_failure("calibrate", error, args.version),
    };
    if let Err(error) = report.table.save(args.out) {
        return weights_failure("calibrate", error, args.version);
    }
    CommandResult::document("calibrate", &report)
}

/// Every `*.json` file directly under `dir`, read in file-name order.
fn load_transcripts(dir: &Path) -> anyhow::Result<Vec<ReviewerTranscript>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("could not list `{}`", dir.display()))? {
        let path = entry.with_context(|| format!("could not list `{}`", dir.display()))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("could not read `{}`", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("`{}` is not a reviewer transcript", path.display()))
        })
        .collect()
}
