use std::sync::Arc;
use std::time::Duration;

use orderly_agent::{CaseRuntime, ReviewerPool, StaticReviewer};
use orderly_core::audit::{AuditCategory, InMemoryAuditSink, InMemoryCommitteeSink};
use orderly_core::consensus::{
    Classification, ConsensusConfig, EntityMatch, EntityResolution, RouteReason, RoutingDecision,
    WeightStore,
};
use orderly_core::domain::column::MappingMethod;
use orderly_core::{CanonicalField, CaseMetadata, ColumnId, ExtractionConfig, ExtractionEngine};
use rust_xlsxwriter::Workbook;

fn ambiguous_sku_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Orders").expect("sheet name");
    sheet.write_string(0, 0, "Item No").expect("write");
    sheet.write_string(0, 1, "Article No").expect("write");
    sheet.write_string(0, 2, "Qty").expect("write");
    let padding = "0".repeat(20);
    for row in 1..=8u32 {
        sheet.write_string(row, 0, format!("A-{row}-{padding}")).expect("write");
        sheet.write_string(row, 1, format!("B-{row}")).expect("write");
        sheet.write_number(row, 2, f64::from(row)).expect("write");
    }
    workbook.save_to_buffer().expect("save")
}

fn scenario_a_workbook() -> Vec<u8> {
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
    workbook.save_to_buffer().expect("save")
}

fn answer(column: &str) -> String {
    format!(
        r#"{{"mappings":[{{"field":"sku","selected_column_id":"{column}","confidence":0.8,"reasoning":"identifier-like values"}}],"issues":[],"overall_confidence":0.8}}"#
    )
}

struct Harness {
    runtime: CaseRuntime,
    committees: InMemoryCommitteeSink,
    audit: InMemoryAuditSink,
}

fn harness(votes: &[(&str, Option<&str>)]) -> Harness {
    let pool = votes.iter().fold(ReviewerPool::new(), |pool, (id, column)| {
        let reviewer = match column {
            Some(column) => StaticReviewer::answering(*id, answer(column)),
            None => StaticReviewer::answering(*id, answer("A")).with_delay(Duration::from_secs(60)),
        };
        pool.with(Arc::new(reviewer), Duration::from_millis(200))
    });
    let committees = InMemoryCommitteeSink::default();
    let audit = InMemoryAuditSink::default();
    let consensus = ConsensusConfig { selection_seed: Some(11), ..ConsensusConfig::default() };
    let runtime = CaseRuntime::new(
        ExtractionEngine::new(ExtractionConfig::default()),
        consensus,
        pool,
        Arc::new(WeightStore::uniform()),
        Arc::new(committees.clone()),
        Arc::new(audit.clone()),
    );
    Harness { runtime, committees, audit }
}

#[tokio::test]
async fn clean_order_proceeds_without_a_committee() {
    let harness = harness(&[("r1", Some("A")), ("r2", Some("A")), ("r3", Some("A"))]);
    let outcome = harness
        .runtime
        .process(&scenario_a_workbook(), &CaseMetadata::new("case-a", "po.xlsx"), &[])
        .await;

    assert!(outcome.pack.is_none());
    assert!(outcome.consensus.is_none());
    assert_eq!(outcome.routing, RoutingDecision::AutoProceed);
    assert_eq!(outcome.order.line_items.len(), 1);
    assert!(harness.committees.records().is_empty());
}

#[tokio::test]
async fn majority_vote_rederives_the_order_and_records_the_round() {
    let harness = harness(&[("r1", Some("A")), ("r2", Some("A")), ("r3", Some("B"))]);
    let outcome = harness
        .runtime
        .process(&ambiguous_sku_workbook(), &CaseMetadata::new("case-b", "po.xlsx"), &[])
        .await;

    let consensus = outcome.consensus.as_ref().expect("committee ran");
    let sku = consensus.field(CanonicalField::Sku).expect("sku reviewed");
    assert_eq!(sku.classification, Classification::Majority);
    assert_eq!(sku.winner, Some(ColumnId("A".to_string())));

    assert_eq!(outcome.order.metadata.version, 2);
    assert_eq!(outcome.order.metadata.parent_version, Some(1));
    let mapping = outcome.order.schema.mapping(CanonicalField::Sku).expect("sku mapped");
    assert_eq!(mapping.column_id, ColumnId("A".to_string()));
    assert_eq!(mapping.method, MappingMethod::ReviewerConsensus);

    if let RoutingDecision::NeedsHuman { reasons, .. } = &outcome.routing {
        assert!(!reasons.iter().any(|reason| matches!(reason, RouteReason::NoAgreement { .. })));
    }

    let records = harness.committees.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].selected.len(), 3);
    assert_eq!(records[0].pool_size, 3);
    assert_eq!(records[0].weight_table_version, "uniform");
    assert!(harness
        .audit
        .events()
        .iter()
        .any(|event| event.category == AuditCategory::Consensus));
}

#[tokio::test]
async fn split_committee_hands_off_with_candidate_evidence() {
    let harness = harness(&[("r1", Some("A")), ("r2", Some("B")), ("r3", None)]);
    let outcome = harness
        .runtime
        .process(&ambiguous_sku_workbook(), &CaseMetadata::new("case-c", "po.xlsx"), &[])
        .await;

    let record = &harness.committees.records()[0];
    assert_eq!(record.abstentions(), 1);
    assert_eq!(outcome.order.metadata.version, 1);

    match &outcome.routing {
        RoutingDecision::NeedsHuman { reasons, review } => {
            assert!(reasons.iter().any(|reason| matches!(
                reason,
                RouteReason::NoAgreement { field: CanonicalField::Sku, classification: Classification::NoConsensus }
            )));
            let sku = review.iter().find(|entry| entry.field == CanonicalField::Sku).expect("sku review");
            assert_eq!(sku.candidates.len(), 2);
            assert!(sku.candidates.iter().all(|candidate| !candidate.evidence.is_empty()));
        }
        RoutingDecision::AutoProceed => panic!("a tied committee must not auto-proceed"),
    }
}

#[tokio::test]
async fn ambiguous_entity_resolution_blocks_auto_proceed() {
    let harness = harness(&[("r1", Some("A")), ("r2", Some("A")), ("r3", Some("A"))]);
    let resolutions = vec![EntityResolution {
        entity: "customer".to_string(),
        result: EntityMatch::Ambiguous { candidates: vec!["C-1".to_string(), "C-2".to_string()] },
    }];
    let outcome = harness
        .runtime
        .process(&scenario_a_workbook(), &CaseMetadata::new("case-d", "po.xlsx"), &resolutions)
        .await;

    match outcome.routing {
        RoutingDecision::NeedsHuman { reasons, .. } => {
            assert!(reasons.iter().any(|reason| matches!(reason, RouteReason::UnresolvedEntity { .. })));
        }
        RoutingDecision::AutoProceed => panic!("ambiguous customer must go to a human"),
    }
}
