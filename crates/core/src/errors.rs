use thiserror::Error;

use crate::config::ConfigError;
use crate::consensus::WeightError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid correction: {0}")]
    InvalidCorrection(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("rejected: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal failure: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "The order could not be processed as submitted.",
            Self::ServiceUnavailable { .. } => "Order review is unavailable right now; try again later.",
            Self::Internal { .. } => "Order processing failed on our side.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    /// Maps to the interface layer, tagged with the case (or CLI run) the
    /// failure belongs to.
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Domain(DomainError::InvalidCorrection(message)) | Self::Decode(message) => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            Self::Integration(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            Self::Configuration(message) => InterfaceError::Internal { message, correlation_id },
        }
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<WeightError> for ApplicationError {
    fn from(value: WeightError) -> Self {
        match value {
            WeightError::Io { .. } => Self::Integration(value.to_string()),
            WeightError::Parse(_) => Self::Decode(value.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}
