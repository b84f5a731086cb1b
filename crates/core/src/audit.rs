use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consensus::{ConsensusResult, ReviewerId, ReviewerOutcome, RoutingDecision, SelectionStrategy};
use crate::domain::order::CaseId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Extraction,
    Consensus,
    Routing,
    Correction,
    Weights,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub case_id: Option<CaseId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        case_id: Option<CaseId>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            case_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Everything needed to explain one consensus round after the fact. Written
/// for every round, including auto-proceed ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitteeRecord {
    pub record_id: String,
    pub case_id: CaseId,
    pub pool_size: usize,
    pub selected: Vec<ReviewerId>,
    pub strategy: SelectionStrategy,
    pub seed: Option<u64>,
    pub outcomes: Vec<ReviewerOutcome>,
    pub result: ConsensusResult,
    pub routing: Option<RoutingDecision>,
    pub weight_table_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CommitteeRecord {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn abstentions(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.vote().is_none()).count()
    }

    /// Summary event for general audit storage.
    pub fn audit_event(&self, actor: impl Into<String>) -> AuditEvent {
        let selected: Vec<&str> = self.selected.iter().map(|id| id.0.as_str()).collect();
        let event = AuditEvent::new(
            Some(self.case_id.clone()),
            self.case_id.to_string(),
            "consensus.committee_completed",
            AuditCategory::Consensus,
            actor,
            AuditOutcome::Success,
        )
        .with_metadata("record_id", self.record_id.clone())
        .with_metadata("classification", self.result.classification.as_str())
        .with_metadata("selected", selected.join(","))
        .with_metadata("strategy", self.strategy.as_str())
        .with_metadata("abstentions", self.abstentions().to_string())
        .with_metadata("weight_table_version", self.weight_table_version.clone())
        .with_metadata("elapsed_ms", self.elapsed_ms().to_string());
        match &self.routing {
            Some(routing) => event.with_metadata("routing", routing.as_str()),
            None => event,
        }
    }
}

pub trait CommitteeSink: Send + Sync {
    fn record(&self, record: CommitteeRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryCommitteeSink {
    records: Arc<Mutex<Vec<CommitteeRecord>>>,
}

impl InMemoryCommitteeSink {
    pub fn records(&self) -> Vec<CommitteeRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CommitteeSink for InMemoryCommitteeSink {
    fn record(&self, record: CommitteeRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use crate::{
        audit::{
            AuditCategory, AuditEvent, AuditOutcome, AuditSink, CommitteeRecord, CommitteeSink,
            InMemoryAuditSink, InMemoryCommitteeSink,
        },
        consensus::{
            AbstainReason, Classification, ConsensusResult, ReviewerId, ReviewerOutcome,
            RoutingDecision, SelectionStrategy,
        },
        domain::order::CaseId,
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                Some(CaseId("case-42".to_owned())),
                "req-123",
                "extraction.completed",
                AuditCategory::Extraction,
                "extraction-engine",
                AuditOutcome::Success,
            )
            .with_metadata("sheet", "Orders")
            .with_metadata("line_items", "3"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].case_id.as_ref().map(|id| id.0.as_str()), Some("case-42"));
        assert!(events[0].metadata.contains_key("sheet"));
    }

    #[test]
    fn committee_records_summarise_into_audit_events() {
        let started = Utc::now();
        let record = CommitteeRecord {
            record_id: "rec-1".to_string(),
            case_id: CaseId("case-9".to_string()),
            pool_size: 5,
            selected: vec![ReviewerId::from("a"), ReviewerId::from("b")],
            strategy: SelectionStrategy::Uniform,
            seed: Some(3),
            outcomes: vec![ReviewerOutcome::abstain(ReviewerId::from("b"), AbstainReason::Timeout, 900)],
            result: ConsensusResult {
                case_id: CaseId("case-9".to_string()),
                fields: BTreeMap::new(),
                classification: Classification::Unanimous,
                disagreements: Vec::new(),
                overall_confidence: 1.0,
                weight_table_version: "uniform".to_string(),
            },
            routing: Some(RoutingDecision::AutoProceed),
            weight_table_version: "uniform".to_string(),
            started_at: started,
            finished_at: started + Duration::milliseconds(250),
        };

        let sink = InMemoryCommitteeSink::default();
        sink.record(record.clone());
        assert_eq!(sink.records(), vec![record.clone()]);

        let event = record.audit_event("committee");
        assert_eq!(event.category, AuditCategory::Consensus);
        assert_eq!(event.metadata["selected"], "a,b");
        assert_eq!(event.metadata["abstentions"], "1");
        assert_eq!(event.metadata["elapsed_ms"], "250");
        assert_eq!(event.metadata["routing"], "auto_proceed");
    }
}
