pub mod approve;
pub mod calibrate;
pub mod config;
pub mod consensus;
pub mod correct;
pub mod extract;
pub mod pack;
pub mod review;

use std::fs;
use std::path::{Path, PathBuf};

use orderly_core::consensus::{WeightError, WeightStore};
use orderly_core::{ApplicationError, CaseMetadata};
use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;
pub const EXIT_DECODE: u8 = 4;
pub const EXIT_WEIGHTS: u8 = 5;
pub const EXIT_RUNTIME: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_message: Option<String>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            user_message: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            user_message: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// A failure mapped through the interface error layer, tagged with the
    /// case or run it belongs to.
    pub fn rejected(
        command: &str,
        error_class: &str,
        error: ApplicationError,
        correlation_id: &str,
        exit_code: u8,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: interface.to_string(),
            correlation_id: Some(interface.correlation_id().to_string()),
            user_message: Some(interface.user_message().to_string()),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Pretty JSON of a produced document (order, pack, result, table).
    pub fn document<T: Serialize>(command: &str, value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_DECODE),
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Shared inputs of the commands that read a workbook.
#[derive(Debug, Clone)]
pub struct WorkbookInput {
    pub file: PathBuf,
    pub case_id: Option<String>,
    pub language: Option<String>,
}

impl WorkbookInput {
    pub fn read(&self, command: &str) -> Result<(Vec<u8>, CaseMetadata), CommandResult> {
        let bytes = fs::read(&self.file).map_err(|error| {
            CommandResult::failure(
                command,
                "input",
                format!("could not read `{}`: {error}", self.file.display()),
                EXIT_INPUT,
            )
        })?;
        let filename = self
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string());
        let case_id = self.case_id.clone().unwrap_or_else(|| {
            self.file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.clone())
        });
        let mut metadata = CaseMetadata::new(case_id, filename);
        if let Some(language) = &self.language {
            metadata = metadata.with_language(language.clone());
        }
        Ok((bytes, metadata))
    }
}

pub(crate) fn read_json<T: for<'de> serde::Deserialize<'de>>(
    command: &str,
    path: &Path,
) -> Result<T, CommandResult> {
    let raw = fs::read_to_string(path).map_err(|error| {
        CommandResult::failure(
            command,
            "input",
            format!("could not read `{}`: {error}", path.display()),
            EXIT_INPUT,
        )
    })?;
    serde_json::from_str(&raw).map_err(|error| {
        CommandResult::failure(
            command,
            "decode",
            format!("`{}` is not valid: {error}", path.display()),
            EXIT_DECODE,
        )
    })
}

pub(crate) fn weights_failure(
    command: &str,
    error: WeightError,
    correlation_id: &str,
) -> CommandResult {
    let class = match &error {
        WeightError::Io { .. } => "input",
        WeightError::Parse(_) => "decode",
        WeightError::Unapproved { .. } => "weights_unapproved",
        WeightError::AlreadyApproved { .. } | WeightError::Invalid(_) => "weights_invalid",
    };
    CommandResult::rejected(command, class, error.into(), correlation_id, EXIT_WEIGHTS)
}

/// The approved table at `path`, or the uniform table when nothing is there.
pub(crate) fn active_weights(path: &Path) -> Result<WeightStore, WeightError> {
    if path.exists() {
        WeightStore::load(path)
    } else {
        tracing::info!(
            event_name = "consensus.weights.uniform",
            path = %path.display(),
            "no active weight table; using uniform weights"
        );
        Ok(WeightStore::uniform())
    }
}
