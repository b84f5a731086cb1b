use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consensus::vote::ReviewerId;
use crate::domain::field::CanonicalField;

#[derive(Debug, Error)]
pub enum WeightError {
    #[error("failed to read weight table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse weight table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("weight table `{version}` has not been approved")]
    Unapproved { version: String },
    #[error("weight table `{version}` is already approved by {approver}")]
    AlreadyApproved { version: String, approver: String },
    #[error("invalid weight table: {0}")]
    Invalid(String),
}

/// Per-field reviewer weights. Produced offline; read-only at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: BTreeMap<CanonicalField, BTreeMap<ReviewerId, f64>>,
}

fn default_weight() -> f64 {
    1.0
}

impl WeightTable {
    /// Equal weights for everyone; used when no calibrated table exists.
    pub fn uniform(created_at: DateTime<Utc>) -> Self {
        Self {
            version: "uniform".to_string(),
            created_at,
            approved_by: Some("builtin".to_string()),
            approved_at: Some(created_at),
            default_weight: 1.0,
            weights: BTreeMap::new(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approved_by.as_deref().is_some_and(|approver| !approver.trim().is_empty())
    }

    pub fn weight(&self, field: CanonicalField, reviewer: &ReviewerId) -> f64 {
        self.weights
            .get(&field)
            .and_then(|by_reviewer| by_reviewer.get(reviewer))
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Mean weight of a reviewer across the fields the table covers.
    pub fn mean_weight(&self, reviewer: &ReviewerId) -> f64 {
        if self.weights.is_empty() {
            return self.default_weight;
        }
        let sum: f64 = self.weights.keys().map(|field| self.weight(*field, reviewer)).sum();
        sum / self.weights.len() as f64
    }

    pub fn checksum(&self) -> Result<String, WeightError> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }

    pub fn validate(&self) -> Result<(), WeightError> {
        if self.version.trim().is_empty() {
            return Err(WeightError::Invalid("version must not be empty".to_string()));
        }
        if !self.default_weight.is_finite() || self.default_weight < 0.0 {
            return Err(WeightError::Invalid("default_weight must be a non-negative number".to_string()));
        }
        for (field, by_reviewer) in &self.weights {
            for (reviewer, weight) in by_reviewer {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(WeightError::Invalid(format!(
                        "weight for {reviewer} on {field} must be a non-negative number"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Marks a candidate table approved. Approving twice is refused.
    pub fn approve(mut self, approver: &str, at: DateTime<Utc>) -> Result<Self, WeightError> {
        if self.is_approved() {
            return Err(WeightError::AlreadyApproved {
                version: self.version.clone(),
                approver: self.approved_by.clone().unwrap_or_default(),
            });
        }
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(WeightError::Invalid("approver must not be empty".to_string()));
        }
        self.validate()?;
        self.approved_by = Some(approver.to_string());
        self.approved_at = Some(at);
        Ok(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, WeightError> {
        let table: Self = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, WeightError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| WeightError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<(), WeightError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| WeightError::Io { path: path.to_path_buf(), source })
    }
}

/// Holds the active table. Readers clone an `Arc` snapshot; replacement is a
/// pointer swap under a short write lock.
#[derive(Debug)]
pub struct WeightStore {
    current: RwLock<Arc<WeightTable>>,
}

impl WeightStore {
    pub fn new(table: WeightTable) -> Result<Self, WeightError> {
        ensure_approved(&table)?;
        Ok(Self { current: RwLock::new(Arc::new(table)) })
    }

    pub fn load(path: &Path) -> Result<Self, WeightError> {
        Self::new(WeightTable::load(path)?)
    }

    pub fn uniform() -> Self {
        Self { current: RwLock::new(Arc::new(WeightTable::uniform(Utc::now()))) }
    }

    pub fn current(&self) -> Arc<WeightTable> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swaps in `table` when its version differs. Returns whether a swap
    /// happened.
    pub fn replace(&self, table: WeightTable) -> Result<bool, WeightError> {
        ensure_approved(&table)?;
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.version == table.version {
            return Ok(false);
        }
        let previous = guard.version.clone();
        *guard = Arc::new(table);
        tracing::info!(
            event_name = "consensus.weights.swapped",
            previous_version = %previous,
            version = %guard.version,
            "weight table replaced"
        );
        Ok(true)
    }

    pub fn reload(&self, path: &Path) -> Result<bool, WeightError> {
        self.replace(WeightTable::load(path)?)
    }
}

fn ensure_approved(table: &WeightTable) -> Result<(), WeightError> {
    if table.is_approved() {
        Ok(())
    } else {
        Err(WeightError::Unapproved { version: table.version.clone() })
    }
}
