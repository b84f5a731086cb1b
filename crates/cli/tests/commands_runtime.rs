use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use clap::Parser;
use orderly_cli::commands::calibrate::CalibrateArgs;
use orderly_cli::commands::{approve, calibrate, consensus, correct, extract, pack, WorkbookInput};
use orderly_cli::{execute, Cli};
use orderly_core::config::AppConfig;
use rust_xlsxwriter::Workbook;
use serde_json::{json, Value};
use tempfile::TempDir;

fn scenario_a(dir: &Path) -> PathBuf {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["Customer", "SKU", "Qty", "Unit Price", "Total"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header).expect("write");
    }
    sheet.write_string(1, 0, "Acme Corp").expect("write");
    sheet.write_string(1, 1, "ABC-001").expect("write");
    sheet.write_number(1, 2, 10.0).expect("write");
    sheet.write_number(1, 3, 25.0).expect("write");
    sheet.write_number(1, 4, 250.0).expect("write");
    let path = dir.join("po-a.xlsx");
    workbook.save(&path).expect("save");
    path
}

fn ambiguous(dir: &Path) -> PathBuf {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Item No").expect("write");
    sheet.write_string(0, 1, "Article No").expect("write");
    sheet.write_string(0, 2, "Qty").expect("write");
    let padding = "0".repeat(20);
    for row in 1..=8u32 {
        sheet.write_string(row, 0, format!("A-{row}-{padding}")).expect("write");
        sheet.write_string(row, 1, format!("B-{row}")).expect("write");
        sheet.write_number(row, 2, f64::from(row)).expect("write");
    }
    let path = dir.join("po-b.xlsx");
    workbook.save(&path).expect("save");
    path
}

fn config_in(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.weights.active_path = dir.path().join("active.json");
    config
}

fn input(file: PathBuf, case_id: &str) -> WorkbookInput {
    WorkbookInput { file, case_id: Some(case_id.to_string()), language: None }
}

fn sku_answer(column: &str) -> Value {
    json!({
        "mappings": [{"field": "sku", "selected_column_id": column, "confidence": 0.9, "reasoning": null}],
        "issues": [],
        "overall_confidence": 0.9
    })
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
}

#[test]
fn extract_prints_the_canonical_order() {
    let dir = TempDir::new().expect("tempdir");
    let result = extract::run(&config_in(&dir), &input(scenario_a(dir.path()), "case-a"));
    assert_eq!(result.exit_code, 0);

    let order = parse_payload(&result.output);
    assert_eq!(order["metadata"]["case_id"], "case-a");
    assert_eq!(order["line_items"].as_array().map(Vec::len), Some(1));
    assert!(order["metadata"]["source_hash"].as_str().is_some_and(|hash| hash.starts_with("sha256:")));
}

#[test]
fn extract_reports_unreadable_input() {
    let dir = TempDir::new().expect("tempdir");
    let result = extract::run(&config_in(&dir), &input(dir.path().join("missing.xlsx"), "case-x"));
    assert_eq!(result.exit_code, 3);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "extract");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "input");
}

#[test]
fn pack_is_only_built_when_something_needs_review() {
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);

    let clean = pack::run(&config, &input(scenario_a(dir.path()), "case-a"));
    assert_eq!(parse_payload(&clean.output)["status"], "ok");

    let review = pack::run(&config, &input(ambiguous(dir.path()), "case-b"));
    let pack = parse_payload(&review.output);
    assert_eq!(pack["case_id"], "case-b");
    assert!(pack["fields"].as_array().is_some_and(|fields| fields.contains(&json!("sku"))));
}

#[test]
fn consensus_aggregates_recorded_votes_and_skips_malformed_ones() {
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let pack_path = dir.path().join("pack.json");
    let pack = pack::run(&config, &input(ambiguous(dir.path()), "case-b"));
    fs::write(&pack_path, &pack.output).expect("write pack");

    let votes_path = dir.path().join("votes.json");
    write_json(
        &votes_path,
        &json!([
            {"reviewer_id": "r1", "response": sku_answer("A")},
            {"reviewer_id": "r2", "response": sku_answer("A")},
            {"reviewer_id": "r3", "response": sku_answer("B")},
            {"reviewer_id": "r4", "response": {"mappings": "nonsense"}}
        ]),
    );

    let result = consensus::run(&config, &pack_path, &votes_path, None);
    assert_eq!(result.exit_code, 0);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["fields"]["sku"]["classification"], "majority");
    assert_eq!(payload["fields"]["sku"]["winner"], "A");
    assert_eq!(payload["weight_table_version"], "uniform");
}

#[test]
fn calibrated_tables_need_approval_before_use() {
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let pack_path = dir.path().join("pack.json");
    let pack_output = pack::run(&config, &input(ambiguous(dir.path()), "case-b")).output;
    fs::write(&pack_path, &pack_output).expect("write pack");
    let pack: Value = parse_payload(&pack_output);

    let corpus_path = dir.path().join("corpus.json");
    write_json(
        &corpus_path,
        &json!({"version": "corpus-1", "cases": [{"pack": pack, "expected": {"sku": "A"}}]}),
    );
    let transcripts = dir.path().join("transcripts");
    fs::create_dir(&transcripts).expect("mkdir");
    write_json(
        &transcripts.join("r1.json"),
        &json!({"reviewer_id": "r1", "responses": {"case-b": sku_answer("A")}}),
    );
    write_json(
        &transcripts.join("r2.json"),
        &json!({"reviewer_id": "r2", "responses": {"case-b": sku_answer("B")}}),
    );

    let candidate = dir.path().join("candidate.json");
    let calibrated = calibrate::run(
        &config,
        &CalibrateArgs {
            corpus: &corpus_path,
            transcripts: &transcripts,
            version: "w-1",
            out: &candidate,
        },
    );
    assert_eq!(calibrated.exit_code, 0, "{}", calibrated.output);
    let report = parse_payload(&calibrated.output);
    assert_eq!(report["table"]["version"], "w-1");
    assert!(report["table"]["approved_by"].is_null());

    let votes_path = dir.path().join("votes.json");
    write_json(&votes_path, &json!([{"reviewer_id": "r1", "response": sku_answer("A")}]));
    let refused = consensus::run(&config, &pack_path, &votes_path, Some(&candidate));
    assert_eq!(refused.exit_code, 5);
    let refusal = parse_payload(&refused.output);
    assert_eq!(refusal["error_class"], "weights_unapproved");
    assert_eq!(refusal["correlation_id"], "case-b");

    let approved = approve::run(&config, &candidate, "ops-lead", None);
    assert_eq!(parse_payload(&approved.output)["status"], "ok");
    assert!(config.weights.active_path.exists());

    let accepted = consensus::run(&config, &pack_path, &votes_path, None);
    assert_eq!(accepted.exit_code, 0);
    assert_eq!(parse_payload(&accepted.output)["weight_table_version"], "w-1");

    let twice = approve::run(&config, &config.weights.active_path, "someone-else", None);
    assert_eq!(twice.exit_code, 5);
}

#[test]
fn corrections_produce_a_new_version_or_a_correlated_rejection() {
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let order_path = dir.path().join("order.json");
    let extracted = extract::run(&config, &input(scenario_a(dir.path()), "case-a"));
    fs::write(&order_path, &extracted.output).expect("write order");

    let edit = |line: usize| {
        json!({
            "corrected_by": "ops-lead",
            "customer": null,
            "line_edits": [{"line": line, "field": "quantity", "value": "12"}]
        })
    };

    let good = dir.path().join("good.json");
    write_json(&good, &edit(0));
    let corrected = correct::run(&config, &order_path, &good);
    assert_eq!(corrected.exit_code, 0, "{}", corrected.output);
    let order = parse_payload(&corrected.output);
    assert_eq!(order["metadata"]["version"], 2);
    assert_eq!(order["metadata"]["parent_version"], 1);

    let bad = dir.path().join("bad.json");
    write_json(&bad, &edit(5));
    let rejected = correct::run(&config, &order_path, &bad);
    assert_eq!(rejected.exit_code, 3);
    let payload = parse_payload(&rejected.output);
    assert_eq!(payload["error_class"], "invalid_correction");
    assert_eq!(payload["correlation_id"], "case-a");
    assert_eq!(payload["user_message"], "The order could not be processed as submitted.");
    assert!(payload["message"].as_str().is_some_and(|message| message.contains("line 5")));
}

#[test]
fn missing_explicit_config_file_is_a_config_failure() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cli = Cli::try_parse_from(["orderly", "--config", path_str(&missing), "config"])
            .expect("parse");
        let result = execute(cli);

        assert_eq!(result.exit_code, 2);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["correlation_id"].as_str().is_some_and(|id| id.starts_with("run-")));
        assert_eq!(payload["user_message"], "Order processing failed on our side.");
    });
}

#[test]
fn config_command_attributes_sources_and_redacts_keys() {
    let dir = TempDir::new().expect("tempdir");
    let config_path = dir.path().join("orderly.toml");
    fs::write(
        &config_path,
        r#"
[consensus]
committee_size = 1

[[reviewers]]
id = "r1"
model = "reviewer-small"
endpoint = "http://127.0.0.1:9/review"
api_key = "sk-super-secret"
"#,
    )
    .expect("write config");

    with_env(&[("ORDERLY_LOG_LEVEL", "debug")], || {
        let cli = Cli::try_parse_from(["orderly", "--config", path_str(&config_path), "config"])
            .expect("parse");
        let result = execute(cli);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let output = result.output;
        assert!(output.contains("- consensus.committee_size = 1 (source: file ("));
        assert!(output.contains("- logging.level = debug (source: env (ORDERLY_LOG_LEVEL))"));
        assert!(output.contains("- reviewers.r1.api_key = sk-*** (source: file ("));
        assert!(output.contains("- consensus.min_votes = 2 (source: default)"));
        assert!(!output.contains("super-secret"));
    });
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ORDERLY_EXTRACTION_MAX_INPUT_BYTES",
        "ORDERLY_EXTRACTION_HEADER_SCAN_ROWS",
        "ORDERLY_EXTRACTION_MAPPING_FLOOR",
        "ORDERLY_EXTRACTION_ABS_TOLERANCE",
        "ORDERLY_EXTRACTION_REL_TOLERANCE",
        "ORDERLY_CONSENSUS_COMMITTEE_SIZE",
        "ORDERLY_CONSENSUS_SELECTION",
        "ORDERLY_CONSENSUS_SELECTION_SEED",
        "ORDERLY_CONSENSUS_MAJORITY_THRESHOLD",
        "ORDERLY_CONSENSUS_MIN_VOTES",
        "ORDERLY_CALIBRATION_MIN_WEIGHT",
        "ORDERLY_WEIGHTS_ACTIVE_PATH",
        "ORDERLY_WEIGHTS_REFRESH_INTERVAL_SECS",
        "ORDERLY_REVIEWER_R1_API_KEY",
        "ORDERLY_LOGGING_LEVEL",
        "ORDERLY_LOGGING_FORMAT",
        "ORDERLY_LOG_LEVEL",
        "ORDERLY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
