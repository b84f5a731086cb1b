pub mod audit;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod errors;
pub mod extraction;

pub use audit::{AuditEvent, AuditSink, CommitteeRecord, CommitteeSink, InMemoryAuditSink};
pub use consensus::{
    Classification, ConsensusAggregator, ConsensusConfig, ConsensusResult, EvidencePack,
    EvidencePackBuilder, ReviewerId, ReviewerOutcome, RoutingDecision, RoutingPolicy,
    SelectionStrategy, WeightStore, WeightTable,
};
pub use domain::evidence::{CellAddress, EvidenceCell, EvidenceId, EvidenceStore};
pub use domain::field::{CanonicalField, ColumnId};
pub use domain::issue::{Issue, IssueCode, IssueLog, Severity};
pub use domain::order::{CanonicalOrder, CaseId, CaseMetadata, LineItem, OrderCorrection};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use extraction::{ExtractionConfig, ExtractionEngine, MappingOverrides};
