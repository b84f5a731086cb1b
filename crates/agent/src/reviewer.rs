use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use orderly_core::config::ReviewerConfig;
use orderly_core::consensus::{AbstainReason, EvidencePack, ReviewerId, ReviewerRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewerError {
    #[error("reviewer transport failed: {0}")]
    Transport(String),
    #[error("reviewer endpoint returned status {0}")]
    Status(u16),
    #[error("reviewer response body unreadable: {0}")]
    Decode(String),
}

impl ReviewerError {
    pub fn abstain_reason(&self) -> AbstainReason {
        match self {
            Self::Transport(_) | Self::Status(_) => AbstainReason::Transport,
            Self::Decode(_) => AbstainReason::Malformed,
        }
    }
}

/// One committee member. Implementations return the raw response body; the
/// committee validates it against the pack.
#[async_trait]
pub trait Reviewer: Send + Sync {
    fn id(&self) -> &ReviewerId;
    async fn review(&self, pack: &EvidencePack) -> Result<String, ReviewerError>;
}

#[derive(Serialize)]
struct ReviewBody<'a> {
    model: &'a str,
    fields: Vec<&'static str>,
    #[serde(flatten)]
    request: ReviewerRequest,
}

/// Reviewer behind a JSON-over-HTTP endpoint.
pub struct HttpReviewer {
    id: ReviewerId,
    model: String,
    endpoint: String,
    api_key: Option<SecretString>,
    client: Client,
}

impl HttpReviewer {
    pub fn new(config: &ReviewerConfig) -> Result<Self, ReviewerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|error| ReviewerError::Transport(error.to_string()))?;
        Ok(Self {
            id: ReviewerId(config.id.clone()),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl Reviewer for HttpReviewer {
    fn id(&self) -> &ReviewerId {
        &self.id
    }

    async fn review(&self, pack: &EvidencePack) -> Result<String, ReviewerError> {
        let body = ReviewBody {
            model: &self.model,
            fields: pack.fields.iter().map(|field| field.as_str()).collect(),
            request: pack.to_request(),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| ReviewerError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(ReviewerError::Status(response.status().as_u16()));
        }
        response.text().await.map_err(|error| ReviewerError::Decode(error.to_string()))
    }
}

#[derive(Clone, Debug)]
pub enum Script {
    Respond(String),
    Fail(String),
}

/// Replays canned answers keyed by case id. Used for transcript replay and in
/// tests; an optional delay simulates a slow backend.
pub struct StaticReviewer {
    id: ReviewerId,
    scripts: Mutex<BTreeMap<String, Script>>,
    fallback: Option<Script>,
    delay: Option<Duration>,
}

impl StaticReviewer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ReviewerId(id.into()),
            scripts: Mutex::new(BTreeMap::new()),
            fallback: None,
            delay: None,
        }
    }

    pub fn answering(id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::new(id).with_fallback(Script::Respond(raw.into()))
    }

    pub fn with_case(self, case_id: impl Into<String>, script: Script) -> Self {
        match self.scripts.lock() {
            Ok(mut scripts) => {
                scripts.insert(case_id.into(), script);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(case_id.into(), script);
            }
        }
        self
    }

    pub fn with_fallback(mut self, script: Script) -> Self {
        self.fallback = Some(script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script_for(&self, case_id: &str) -> Option<Script> {
        let scripts = self.scripts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        scripts.get(case_id).cloned().or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Reviewer for StaticReviewer {
    fn id(&self) -> &ReviewerId {
        &self.id
    }

    async fn review(&self, pack: &EvidencePack) -> Result<String, ReviewerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script_for(&pack.case_id.0) {
            Some(Script::Respond(raw)) => Ok(raw),
            Some(Script::Fail(message)) => Err(ReviewerError::Transport(message)),
            None => Err(ReviewerError::Transport(format!("no scripted answer for {}", pack.case_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orderly_core::consensus::{AbstainReason, EvidencePack};
    use orderly_core::{CanonicalField, CaseId};

    use super::{Reviewer, ReviewerError, Script, StaticReviewer};

    fn pack(case_id: &str) -> EvidencePack {
        EvidencePack {
            case_id: CaseId(case_id.to_string()),
            language_hint: None,
            fields: vec![CanonicalField::Sku],
            candidates: Vec::new(),
            constraints: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn static_reviewer_prefers_case_script_over_fallback() {
        let reviewer = StaticReviewer::answering("r1", "{}")
            .with_case("case-2", Script::Fail("backend down".to_string()));

        assert_eq!(reviewer.review(&pack("case-1")).await.expect("fallback"), "{}");
        let error = reviewer.review(&pack("case-2")).await.expect_err("scripted failure");
        assert_eq!(error.abstain_reason(), AbstainReason::Transport);
    }

    #[tokio::test]
    async fn unscripted_case_is_a_transport_failure() {
        let reviewer = StaticReviewer::new("r1");
        let error = reviewer.review(&pack("case-9")).await.expect_err("nothing scripted");
        assert!(matches!(error, ReviewerError::Transport(_)));
    }

    #[test]
    fn decode_failures_abstain_as_malformed() {
        assert_eq!(ReviewerError::Decode("eof".to_string()).abstain_reason(), AbstainReason::Malformed);
        assert_eq!(ReviewerError::Status(503).abstain_reason(), AbstainReason::Transport);
    }
}
