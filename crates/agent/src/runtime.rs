use std::sync::Arc;

use chrono::Utc;
use orderly_core::audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, CommitteeRecord, CommitteeSink,
};
use orderly_core::consensus::{
    ConsensusAggregator, ConsensusConfig, ConsensusResult, EntityResolution, EvidencePack,
    EvidencePackBuilder, RoutingDecision, RoutingPolicy, WeightStore,
};
use orderly_core::{CanonicalOrder, CaseMetadata, ExtractionEngine};
use serde::Serialize;
use uuid::Uuid;

use crate::committee::convene;
use crate::pool::ReviewerPool;

const ACTOR: &str = "orderly-agent";

/// Everything produced while processing one upload.
#[derive(Clone, Debug, Serialize)]
pub struct CaseOutcome {
    pub order: CanonicalOrder,
    pub pack: Option<EvidencePack>,
    pub consensus: Option<ConsensusResult>,
    pub routing: RoutingDecision,
    pub record: Option<CommitteeRecord>,
}

/// Extraction, reviewer consensus and routing for one case at a time.
pub struct CaseRuntime {
    engine: ExtractionEngine,
    consensus: ConsensusConfig,
    pool: ReviewerPool,
    weights: Arc<WeightStore>,
    routing: RoutingPolicy,
    committee_sink: Arc<dyn CommitteeSink>,
    audit_sink: Arc<dyn AuditSink>,
}

impl CaseRuntime {
    pub fn new(
        engine: ExtractionEngine,
        consensus: ConsensusConfig,
        pool: ReviewerPool,
        weights: Arc<WeightStore>,
        committee_sink: Arc<dyn CommitteeSink>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            engine,
            consensus,
            pool,
            weights,
            routing: RoutingPolicy,
            committee_sink,
            audit_sink,
        }
    }

    pub fn pool(&self) -> &ReviewerPool {
        &self.pool
    }

    pub async fn process(
        &self,
        bytes: &[u8],
        metadata: &CaseMetadata,
        resolutions: &[EntityResolution],
    ) -> CaseOutcome {
        let order = self.engine.extract(bytes, metadata);
        let case_id = order.metadata.case_id.clone();
        self.audit_sink.emit(
            AuditEvent::new(
                Some(case_id.clone()),
                case_id.to_string(),
                "extraction.completed",
                AuditCategory::Extraction,
                ACTOR,
                if order.has_blocker() { AuditOutcome::Rejected } else { AuditOutcome::Success },
            )
            .with_metadata("version", order.metadata.version.to_string())
            .with_metadata("line_items", order.line_items.len().to_string())
            .with_metadata("issues", order.issues.len().to_string()),
        );

        let pack = if order.has_blocker() {
            None
        } else {
            EvidencePackBuilder::new(self.consensus.pack_limits()).build(&order, Utc::now())
        };
        let Some(pack) = pack else {
            let routing = self.route(&order, None, resolutions);
            return CaseOutcome { order, pack: None, consensus: None, routing, record: None };
        };

        let started_at = Utc::now();
        let table = self.weights.current();
        let selection = self.pool.select(
            self.consensus.committee_size,
            self.consensus.selection,
            self.consensus.selection_seed,
            &table,
        );
        let shared_pack = Arc::new(pack.clone());
        let outcomes = convene(&selection.members, shared_pack).await;

        let aggregator = ConsensusAggregator::new(self.consensus.thresholds());
        let result = aggregator.aggregate(&case_id, &pack.fields, &outcomes, &table);

        let overrides = result.agreed_overrides();
        let order = if overrides.is_empty() {
            order
        } else {
            self.engine.rederive(bytes, &order, &overrides)
        };
        let routing = self.route(&order, Some(&result), resolutions);

        let record = CommitteeRecord {
            record_id: Uuid::new_v4().to_string(),
            case_id: case_id.clone(),
            pool_size: selection.pool_size,
            selected: selection.ids(),
            strategy: selection.strategy,
            seed: selection.seed,
            outcomes,
            result: result.clone(),
            routing: Some(routing.clone()),
            weight_table_version: table.version.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        self.audit_sink.emit(record.audit_event(ACTOR));
        self.committee_sink.record(record.clone());

        CaseOutcome { order, pack: Some(pack), consensus: Some(result), routing, record: Some(record) }
    }

    fn route(
        &self,
        order: &CanonicalOrder,
        consensus: Option<&ConsensusResult>,
        resolutions: &[EntityResolution],
    ) -> RoutingDecision {
        let routing = self.routing.route(order, consensus, resolutions);
        let case_id = &order.metadata.case_id;
        self.audit_sink.emit(
            AuditEvent::new(
                Some(case_id.clone()),
                case_id.to_string(),
                "routing.decided",
                AuditCategory::Routing,
                ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("decision", routing.as_str())
            .with_metadata("version", order.metadata.version.to_string()),
        );
        routing
    }
}
