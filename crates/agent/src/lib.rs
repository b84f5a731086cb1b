//! Reviewer committee runtime.
//!
//! Drives one case from uploaded bytes to a routing decision:
//! 1. **Extraction** via `orderly_core::ExtractionEngine`
//! 2. **Evidence pack** for fields the extractor could not settle alone
//! 3. **Committee** (`pool`, `committee`) - a seeded or random subset of
//!    reviewers answers in parallel, each under its own timeout
//! 4. **Aggregation and routing** - weighted votes, re-extraction with agreed
//!    mappings, then auto-proceed or hand-off to a human
//!
//! Reviewers only ever see column ids, headers and bounded samples. They pick
//! among supplied columns; every number in the order comes from the sheet.

pub mod committee;
pub mod pool;
pub mod reviewer;
pub mod runtime;
pub mod weights;

pub use committee::convene;
pub use pool::{PoolMember, ReviewerPool, Selection};
pub use reviewer::{HttpReviewer, Reviewer, ReviewerError, Script, StaticReviewer};
pub use runtime::{CaseOutcome, CaseRuntime};
pub use weights::{refresh_once, spawn_refresher};
