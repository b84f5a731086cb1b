//! Offline weight calibration against a labelled corpus.
//!
//! Reviewers are scored per field on how often they picked the expected
//! column. Scores are normalised so the mean weight per field is 1.0. The
//! result is a candidate table that must be approved before use.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::pack::EvidencePack;
use crate::consensus::vote::{validate_response, ReviewerId, ReviewerOutcome, ReviewerResponse};
use crate::consensus::weights::{WeightError, WeightTable};
use crate::domain::field::{CanonicalField, ColumnId};

pub const DEFAULT_MIN_WEIGHT: f64 = 0.05;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCase {
    pub pack: EvidencePack,
    pub expected: BTreeMap<CanonicalField, ColumnId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCorpus {
    pub version: String,
    pub cases: Vec<CalibrationCase>,
}

/// Recorded answers of one reviewer, keyed by case id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewerTranscript {
    pub reviewer_id: ReviewerId,
    pub responses: BTreeMap<String, ReviewerResponse>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldAccuracy {
    pub reviewer_id: ReviewerId,
    pub field: CanonicalField,
    pub correct: usize,
    pub attempted: usize,
    pub accuracy: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub corpus_version: String,
    pub accuracy: Vec<FieldAccuracy>,
    pub table: WeightTable,
}

pub fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, WeightError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| WeightError::Io { path: path.to_path_buf(), source })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Scores every transcript against the corpus and emits an unapproved table.
/// A missing, malformed or out-of-range answer counts as wrong.
pub fn calibrate(
    corpus: &CalibrationCorpus,
    transcripts: &[ReviewerTranscript],
    version: &str,
    min_weight: f64,
    at: DateTime<Utc>,
) -> Result<CalibrationReport, WeightError> {
    if version.trim().is_empty() {
        return Err(WeightError::Invalid("version must not be empty".to_string()));
    }
    if corpus.cases.is_empty() {
        return Err(WeightError::Invalid("calibration corpus has no cases".to_string()));
    }
    let reviewers: BTreeSet<&ReviewerId> =
        transcripts.iter().map(|transcript| &transcript.reviewer_id).collect();
    if reviewers.len() != transcripts.len() {
        return Err(WeightError::Invalid("duplicate reviewer transcript".to_string()));
    }

    let mut counts: BTreeMap<(CanonicalField, ReviewerId), (usize, usize)> = BTreeMap::new();
    for case in &corpus.cases {
        let case_key = case.pack.case_id.to_string();
        for transcript in transcripts {
            let outcome = transcript.responses.get(&case_key).map(|response| {
                validate_response(transcript.reviewer_id.clone(), &case.pack, response, 0)
            });
            for (field, expected) in &case.expected {
                let entry =
                    counts.entry((*field, transcript.reviewer_id.clone())).or_insert((0, 0));
                entry.1 += 1;
                let picked = outcome
                    .as_ref()
                    .and_then(ReviewerOutcome::vote)
                    .and_then(|vote| vote.choices.get(field));
                if picked.is_some_and(|choice| &choice.column_id == expected) {
                    entry.0 += 1;
                }
            }
        }
    }

    let accuracy: Vec<FieldAccuracy> = counts
        .iter()
        .map(|((field, reviewer_id), (correct, attempted))| FieldAccuracy {
            reviewer_id: reviewer_id.clone(),
            field: *field,
            correct: *correct,
            attempted: *attempted,
            accuracy: if *attempted == 0 { 0.0 } else { *correct as f64 / *attempted as f64 },
        })
        .collect();

    let mut weights: BTreeMap<CanonicalField, BTreeMap<ReviewerId, f64>> = BTreeMap::new();
    let fields: BTreeSet<CanonicalField> = accuracy.iter().map(|entry| entry.field).collect();
    for field in fields {
        let scores: Vec<&FieldAccuracy> =
            accuracy.iter().filter(|entry| entry.field == field).collect();
        let mean = scores.iter().map(|entry| entry.accuracy).sum::<f64>() / scores.len() as f64;
        let row = scores
            .iter()
            .map(|entry| {
                let weight = if mean > 0.0 { entry.accuracy / mean } else { 1.0 };
                (entry.reviewer_id.clone(), weight.max(min_weight))
            })
            .collect();
        weights.insert(field, row);
    }

    let table = WeightTable {
        version: version.to_string(),
        created_at: at,
        approved_by: None,
        approved_at: None,
        default_weight: 1.0,
        weights,
    };
    table.validate()?;

    tracing::info!(
        event_name = "consensus.calibration.completed",
        corpus_version = %corpus.version,
        version = %table.version,
        cases = corpus.cases.len(),
        reviewers = transcripts.len(),
        "candidate weight table produced; approval required"
    );

    Ok(CalibrationReport { corpus_version: corpus.version.clone(), accuracy, table })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::{calibrate, CalibrationCase, CalibrationCorpus, ReviewerTranscript};
    use crate::consensus::pack::{EvidencePack, PackCandidate};
    use crate::consensus::vote::{ReviewerId, ReviewerResponse, ResponseMapping};
    use crate::consensus::weights::WeightStore;
    use crate::domain::field::{CanonicalField, ColumnId};
    use crate::domain::order::CaseId;

    fn case(id: &str, expected: &str) -> CalibrationCase {
        let candidate = |column: &str| PackCandidate {
            column_id: ColumnId(column.to_string()),
            header: column.to_string(),
            samples: Vec::new(),
            evidence: Vec::new(),
        };
        CalibrationCase {
            pack: EvidencePack {
                case_id: CaseId(id.to_string()),
                language_hint: None,
                fields: vec![CanonicalField::Sku],
                candidates: vec![candidate("A"), candidate("B")],
                constraints: Vec::new(),
                created_at: Utc::now(),
            },
            expected: [(CanonicalField::Sku, ColumnId(expected.to_string()))].into_iter().collect(),
        }
    }

    fn answer(column: &str) -> ReviewerResponse {
        ReviewerResponse {
            mappings: vec![ResponseMapping {
                field: "sku".to_string(),
                selected_column_id: column.to_string(),
                confidence: 0.9,
                reasoning: None,
            }],
            issues: Vec::new(),
            overall_confidence: 0.9,
        }
    }

    fn transcript(reviewer: &str, answers: &[(&str, &str)]) -> ReviewerTranscript {
        ReviewerTranscript {
            reviewer_id: ReviewerId::from(reviewer),
            responses: answers
                .iter()
                .map(|(case_id, column)| (case_id.to_string(), answer(column)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn corpus() -> CalibrationCorpus {
        CalibrationCorpus {
            version: "corpus-1".to_string(),
            cases: vec![case("c1", "A"), case("c2", "B"), case("c3", "A"), case("c4", "B")],
        }
    }

    #[test]
    fn weights_are_normalised_per_field() {
        let transcripts = vec![
            transcript("good", &[("c1", "A"), ("c2", "B"), ("c3", "A"), ("c4", "B")]),
            transcript("fair", &[("c1", "A"), ("c2", "B"), ("c3", "B"), ("c4", "A")]),
            transcript("bad", &[("c1", "B"), ("c2", "A"), ("c3", "B"), ("c4", "A")]),
        ];
        let report = calibrate(&corpus(), &transcripts, "w-2", 0.05, Utc::now()).expect("calibrate");
        let sku = &report.table.weights[&CanonicalField::Sku];

        assert!((sku[&ReviewerId::from("good")] - 2.0).abs() < 1e-9);
        assert!((sku[&ReviewerId::from("fair")] - 1.0).abs() < 1e-9);
        assert!((sku[&ReviewerId::from("bad")] - 0.05).abs() < 1e-9);
        assert!(report.table.approved_by.is_none());
        assert_eq!(report.corpus_version, "corpus-1");
    }

    #[test]
    fn candidate_tables_cannot_go_live_until_approved() {
        let transcripts = vec![transcript("good", &[("c1", "A")])];
        let report = calibrate(&corpus(), &transcripts, "w-3", 0.05, Utc::now()).expect("calibrate");

        assert!(WeightStore::new(report.table.clone()).is_err());
        let approved = report.table.approve("ops-lead", Utc::now()).expect("approve");
        assert!(WeightStore::new(approved).is_ok());
    }

    #[test]
    fn missing_and_out_of_range_answers_count_as_wrong() {
        let transcripts = vec![
            transcript("partial", &[("c1", "A")]),
            transcript("rogue", &[("c1", "Z"), ("c2", "Z"), ("c3", "Z"), ("c4", "Z")]),
        ];
        let report = calibrate(&corpus(), &transcripts, "w-4", 0.05, Utc::now()).expect("calibrate");
        let partial = report
            .accuracy
            .iter()
            .find(|entry| entry.reviewer_id == ReviewerId::from("partial"))
            .expect("partial");
        assert_eq!((partial.correct, partial.attempted), (1, 4));

        let sku = &report.table.weights[&CanonicalField::Sku];
        assert!((sku[&ReviewerId::from("partial")] - 2.0).abs() < 1e-9);
        assert!((sku[&ReviewerId::from("rogue")] - 0.05).abs() < 1e-9);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let empty = CalibrationCorpus { version: "0".to_string(), cases: Vec::new() };
        assert!(calibrate(&empty, &[], "w", 0.05, Utc::now()).is_err());
    }
}
