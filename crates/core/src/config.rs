use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::calibration::DEFAULT_MIN_WEIGHT;
use crate::consensus::{ConsensusConfig, SelectionStrategy};
use crate::extraction::ExtractionConfig;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["orderly.toml", "config/orderly.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub extraction: ExtractionConfig,
    pub consensus: ConsensusConfig,
    pub calibration: CalibrationConfig,
    pub weights: WeightsConfig,
    pub reviewers: Vec<ReviewerConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    pub min_weight: f64,
}

#[derive(Clone, Debug)]
pub struct WeightsConfig {
    /// Approved table read at runtime. Missing file means uniform weights.
    pub active_path: PathBuf,
    pub refresh_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReviewerConfig {
    pub id: String,
    pub model: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub weights_path: Option<PathBuf>,
    pub committee_size: Option<usize>,
    pub selection_seed: Option<u64>,
    pub max_input_bytes: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_REVIEWER_TIMEOUT_MS: u64 = 20_000;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            consensus: ConsensusConfig::default(),
            calibration: CalibrationConfig { min_weight: DEFAULT_MIN_WEIGHT },
            weights: WeightsConfig {
                active_path: PathBuf::from("weights/active.json"),
                refresh_interval_secs: 300,
            },
            reviewers: Vec::new(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

fn parse_selection(key: &str, value: &str) -> Result<SelectionStrategy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "uniform" => Ok(SelectionStrategy::Uniform),
        "weighted" => Ok(SelectionStrategy::Weighted),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

impl ReviewerConfig {
    /// `ORDERLY_REVIEWER_<ID>_API_KEY`, with the id upper-cased and
    /// non-alphanumerics replaced by `_`.
    pub fn api_key_env_var(&self) -> String {
        let id: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("ORDERLY_REVIEWER_{id}_API_KEY")
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn enabled_reviewers(&self) -> impl Iterator<Item = &ReviewerConfig> {
        self.reviewers.iter().filter(|reviewer| reviewer.enabled)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(extraction) = patch.extraction {
            self.extraction = extraction;
        }
        if let Some(consensus) = patch.consensus {
            self.consensus = consensus;
        }

        if let Some(calibration) = patch.calibration {
            if let Some(min_weight) = calibration.min_weight {
                self.calibration.min_weight = min_weight;
            }
        }

        if let Some(weights) = patch.weights {
            if let Some(active_path) = weights.active_path {
                self.weights.active_path = active_path;
            }
            if let Some(refresh_interval_secs) = weights.refresh_interval_secs {
                self.weights.refresh_interval_secs = refresh_interval_secs;
            }
        }

        if let Some(reviewers) = patch.reviewers {
            self.reviewers = reviewers
                .into_iter()
                .map(|reviewer| ReviewerConfig {
                    id: reviewer.id,
                    model: reviewer.model,
                    endpoint: reviewer.endpoint,
                    timeout_ms: reviewer.timeout_ms.unwrap_or(DEFAULT_REVIEWER_TIMEOUT_MS),
                    enabled: reviewer.enabled.unwrap_or(true),
                    api_key: reviewer.api_key.map(secret_value), // ubs:ignore
                })
                .collect();
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ORDERLY_EXTRACTION_MAX_INPUT_BYTES") {
            self.extraction.max_input_bytes =
                parse_usize("ORDERLY_EXTRACTION_MAX_INPUT_BYTES", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_EXTRACTION_HEADER_SCAN_ROWS") {
            self.extraction.header_scan_rows =
                parse_u32("ORDERLY_EXTRACTION_HEADER_SCAN_ROWS", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_EXTRACTION_MAPPING_FLOOR") {
            self.extraction.mapping_floor = parse_f64("ORDERLY_EXTRACTION_MAPPING_FLOOR", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_EXTRACTION_ABS_TOLERANCE") {
            self.extraction.abs_tolerance = parse_f64("ORDERLY_EXTRACTION_ABS_TOLERANCE", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_EXTRACTION_REL_TOLERANCE") {
            self.extraction.rel_tolerance = parse_f64("ORDERLY_EXTRACTION_REL_TOLERANCE", &value)?;
        }

        if let Some(value) = read_env("ORDERLY_CONSENSUS_COMMITTEE_SIZE") {
            self.consensus.committee_size =
                parse_usize("ORDERLY_CONSENSUS_COMMITTEE_SIZE", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_CONSENSUS_SELECTION") {
            self.consensus.selection = parse_selection("ORDERLY_CONSENSUS_SELECTION", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_CONSENSUS_SELECTION_SEED") {
            self.consensus.selection_seed =
                Some(parse_u64("ORDERLY_CONSENSUS_SELECTION_SEED", &value)?);
        }
        if let Some(value) = read_env("ORDERLY_CONSENSUS_MAJORITY_THRESHOLD") {
            self.consensus.majority_threshold =
                parse_f64("ORDERLY_CONSENSUS_MAJORITY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("ORDERLY_CONSENSUS_MIN_VOTES") {
            self.consensus.min_votes = parse_usize("ORDERLY_CONSENSUS_MIN_VOTES", &value)?;
        }

        if let Some(value) = read_env("ORDERLY_CALIBRATION_MIN_WEIGHT") {
            self.calibration.min_weight = parse_f64("ORDERLY_CALIBRATION_MIN_WEIGHT", &value)?;
        }

        if let Some(value) = read_env("ORDERLY_WEIGHTS_ACTIVE_PATH") {
            self.weights.active_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("ORDERLY_WEIGHTS_REFRESH_INTERVAL_SECS") {
            self.weights.refresh_interval_secs =
                parse_u64("ORDERLY_WEIGHTS_REFRESH_INTERVAL_SECS", &value)?;
        }

        for reviewer in &mut self.reviewers {
            if let Some(value) = read_env(&reviewer.api_key_env_var()) {
                reviewer.api_key = Some(secret_value(value)); // ubs:ignore
            }
        }

        let log_level =
            read_env("ORDERLY_LOGGING_LEVEL").or_else(|| read_env("ORDERLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ORDERLY_LOGGING_FORMAT").or_else(|| read_env("ORDERLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(weights_path) = overrides.weights_path {
            self.weights.active_path = weights_path;
        }
        if let Some(committee_size) = overrides.committee_size {
            self.consensus.committee_size = committee_size;
        }
        if let Some(selection_seed) = overrides.selection_seed {
            self.consensus.selection_seed = Some(selection_seed);
        }
        if let Some(max_input_bytes) = overrides.max_input_bytes {
            self.extraction.max_input_bytes = max_input_bytes;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_extraction(&self.extraction)?;
        validate_consensus(&self.consensus)?;
        validate_calibration(&self.calibration)?;
        validate_weights(&self.weights)?;
        validate_reviewers(&self.reviewers, self.consensus.committee_size)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The file `load` would read: the explicit path if it exists, else the first
/// default location present.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn validate_extraction(extraction: &ExtractionConfig) -> Result<(), ConfigError> {
    if extraction.max_input_bytes == 0 {
        return Err(ConfigError::Validation(
            "extraction.max_input_bytes must be greater than zero".to_string(),
        ));
    }
    if extraction.header_scan_rows == 0 {
        return Err(ConfigError::Validation(
            "extraction.header_scan_rows must be greater than zero".to_string(),
        ));
    }

    let floors = [
        ("extraction.sheet_score_floor", extraction.sheet_score_floor),
        ("extraction.header_score_floor", extraction.header_score_floor),
        ("extraction.mapping_floor", extraction.mapping_floor),
        ("extraction.ambiguity_margin", extraction.ambiguity_margin),
    ];
    for (key, value) in floors {
        if !unit_interval(value) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0..=1")));
        }
    }

    if !(extraction.abs_tolerance >= 0.0 && extraction.rel_tolerance >= 0.0) {
        return Err(ConfigError::Validation(
            "extraction tolerances must be non-negative".to_string(),
        ));
    }

    let weights = extraction.confidence_weights;
    let sum = weights.sheet + weights.header + weights.mapping;
    let parts_valid = [weights.sheet, weights.header, weights.mapping].into_iter().all(unit_interval);
    if !parts_valid || (sum - 1.0).abs() > 1e-6 {
        return Err(ConfigError::Validation(
            "extraction.confidence_weights must be in 0..=1 and sum to 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_consensus(consensus: &ConsensusConfig) -> Result<(), ConfigError> {
    if consensus.committee_size == 0 {
        return Err(ConfigError::Validation(
            "consensus.committee_size must be greater than zero".to_string(),
        ));
    }
    if !(consensus.majority_threshold > 0.5 && consensus.majority_threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "consensus.majority_threshold must be in range (0.5, 1]".to_string(),
        ));
    }
    if consensus.min_votes == 0 {
        return Err(ConfigError::Validation(
            "consensus.min_votes must be greater than zero".to_string(),
        ));
    }
    if consensus.max_candidates == 0
        || consensus.max_samples_per_candidate == 0
        || consensus.max_sample_chars == 0
    {
        return Err(ConfigError::Validation(
            "consensus pack limits must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_calibration(calibration: &CalibrationConfig) -> Result<(), ConfigError> {
    if !unit_interval(calibration.min_weight) {
        return Err(ConfigError::Validation(
            "calibration.min_weight must be in range 0..=1".to_string(),
        ));
    }
    Ok(())
}

fn validate_weights(weights: &WeightsConfig) -> Result<(), ConfigError> {
    if weights.active_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("weights.active_path must not be empty".to_string()));
    }
    if weights.refresh_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "weights.refresh_interval_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_reviewers(reviewers: &[ReviewerConfig], committee_size: usize) -> Result<(), ConfigError> {
    let mut seen = std::collections::BTreeSet::new();
    for reviewer in reviewers {
        if reviewer.id.trim().is_empty() {
            return Err(ConfigError::Validation("reviewers[].id must not be empty".to_string()));
        }
        if !seen.insert(reviewer.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "reviewer id `{}` is configured twice",
                reviewer.id
            )));
        }
        if !reviewer.endpoint.starts_with("http://") && !reviewer.endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "reviewer `{}` endpoint must start with http:// or https://",
                reviewer.id
            )));
        }
        if reviewer.model.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "reviewer `{}` needs a model identifier",
                reviewer.id
            )));
        }
        if reviewer.timeout_ms == 0 || reviewer.timeout_ms > 300_000 {
            return Err(ConfigError::Validation(format!(
                "reviewer `{}` timeout_ms must be in range 1..=300000",
                reviewer.id
            )));
        }
        if let Some(api_key) = &reviewer.api_key {
            if api_key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "reviewer `{}` api_key is set but empty",
                    reviewer.id
                )));
            }
        }
    }

    let enabled = reviewers.iter().filter(|reviewer| reviewer.enabled).count();
    if enabled > 0 && enabled < committee_size {
        return Err(ConfigError::Validation(format!(
            "consensus.committee_size is {committee_size} but only {enabled} reviewer(s) are enabled"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    extraction: Option<ExtractionConfig>,
    consensus: Option<ConsensusConfig>,
    calibration: Option<CalibrationPatch>,
    weights: Option<WeightsPatch>,
    reviewers: Option<Vec<ReviewerPatch>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CalibrationPatch {
    min_weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WeightsPatch {
    active_path: Option<PathBuf>,
    refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReviewerPatch {
    id: String,
    model: String,
    endpoint: String,
    timeout_ms: Option<u64>,
    enabled: Option<bool>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
