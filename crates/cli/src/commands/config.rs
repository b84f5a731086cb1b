use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use orderly_core::config::{resolve_config_path, AppConfig, ReviewerConfig};
use secrecy::ExposeSecret;
use toml::Value;

struct FileDoc {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl FileDoc {
    fn load(explicit: Option<&Path>) -> Self {
        let path = resolve_config_path(explicit);
        let doc = path.as_deref().and_then(load_config_file_doc);
        Self { path, doc }
    }

    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }
        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                return format!("file ({})", self.file_label());
            }
        }
        "default".to_string()
    }

    fn reviewer_source(&self, reviewer: &ReviewerConfig, key: &str) -> String {
        if key == "api_key" {
            let env_key = reviewer.api_key_env_var();
            if env::var_os(&env_key).is_some() {
                return format!("env ({env_key})");
            }
        }
        let in_file = self
            .doc
            .as_ref()
            .and_then(|doc| doc.get("reviewers"))
            .and_then(Value::as_array)
            .and_then(|entries| {
                entries.iter().find(|entry| {
                    entry.get("id").and_then(Value::as_str) == Some(reviewer.id.as_str())
                })
            })
            .is_some_and(|entry| entry.get(key).is_some());
        if in_file {
            format!("file ({})", self.file_label())
        } else {
            "default".to_string()
        }
    }

    fn file_label(&self) -> String {
        self.path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string())
    }
}

pub fn run(config: &AppConfig, explicit_path: Option<&Path>) -> String {
    let file = FileDoc::load(explicit_path);
    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        lines.push(render_line(key, &value, file.source(key, env_keys)));
    };

    let extraction = &config.extraction;
    push(
        "extraction.max_input_bytes",
        extraction.max_input_bytes.to_string(),
        &["ORDERLY_EXTRACTION_MAX_INPUT_BYTES"],
    );
    push(
        "extraction.header_scan_rows",
        extraction.header_scan_rows.to_string(),
        &["ORDERLY_EXTRACTION_HEADER_SCAN_ROWS"],
    );
    push(
        "extraction.mapping_floor",
        extraction.mapping_floor.to_string(),
        &["ORDERLY_EXTRACTION_MAPPING_FLOOR"],
    );
    push(
        "extraction.abs_tolerance",
        extraction.abs_tolerance.to_string(),
        &["ORDERLY_EXTRACTION_ABS_TOLERANCE"],
    );
    push(
        "extraction.rel_tolerance",
        extraction.rel_tolerance.to_string(),
        &["ORDERLY_EXTRACTION_REL_TOLERANCE"],
    );

    let consensus = &config.consensus;
    push(
        "consensus.committee_size",
        consensus.committee_size.to_string(),
        &["ORDERLY_CONSENSUS_COMMITTEE_SIZE"],
    );
    push(
        "consensus.selection",
        consensus.selection.as_str().to_string(),
        &["ORDERLY_CONSENSUS_SELECTION"],
    );
    push(
        "consensus.selection_seed",
        consensus.selection_seed.map_or_else(|| "<unset>".to_string(), |seed| seed.to_string()),
        &["ORDERLY_CONSENSUS_SELECTION_SEED"],
    );
    push(
        "consensus.majority_threshold",
        consensus.majority_threshold.to_string(),
        &["ORDERLY_CONSENSUS_MAJORITY_THRESHOLD"],
    );
    push("consensus.min_votes", consensus.min_votes.to_string(), &["ORDERLY_CONSENSUS_MIN_VOTES"]);

    push(
        "calibration.min_weight",
        config.calibration.min_weight.to_string(),
        &["ORDERLY_CALIBRATION_MIN_WEIGHT"],
    );
    push(
        "weights.active_path",
        config.weights.active_path.display().to_string(),
        &["ORDERLY_WEIGHTS_ACTIVE_PATH"],
    );
    push(
        "weights.refresh_interval_secs",
        config.weights.refresh_interval_secs.to_string(),
        &["ORDERLY_WEIGHTS_REFRESH_INTERVAL_SECS"],
    );

    push("logging.level", config.logging.level.clone(), &[
        "ORDERLY_LOGGING_LEVEL",
        "ORDERLY_LOG_LEVEL",
    ]);
    push("logging.format", format!("{:?}", config.logging.format).to_lowercase(), &[
        "ORDERLY_LOGGING_FORMAT",
        "ORDERLY_LOG_FORMAT",
    ]);

    if config.reviewers.is_empty() {
        lines.push(render_line("reviewers", "<none>", file.source("reviewers", &[])));
    }
    for reviewer in &config.reviewers {
        let prefix = format!("reviewers.{}", reviewer.id);
        lines.push(render_line(
            &format!("{prefix}.model"),
            &reviewer.model,
            file.reviewer_source(reviewer, "model"),
        ));
        lines.push(render_line(
            &format!("{prefix}.endpoint"),
            &reviewer.endpoint,
            file.reviewer_source(reviewer, "endpoint"),
        ));
        lines.push(render_line(
            &format!("{prefix}.timeout_ms"),
            &reviewer.timeout_ms.to_string(),
            file.reviewer_source(reviewer, "timeout_ms"),
        ));
        lines.push(render_line(
            &format!("{prefix}.enabled"),
            &reviewer.enabled.to_string(),
            file.reviewer_source(reviewer, "enabled"),
        ));
        let api_key = match &reviewer.api_key {
            Some(key) => redact_token(key.expose_secret()),
            None => "<unset>".to_string(),
        };
        lines.push(render_line(
            &format!("{prefix}.api_key"),
            &api_key,
            file.reviewer_source(reviewer, "api_key"),
        ));
    }

    lines.join("\n")
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable key prefix (`sk-`, `key-`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::redact_token;

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }
}
