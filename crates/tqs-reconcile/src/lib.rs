//! tqs-reconcile
//!
//! Merge of a locally cached quiz result with the server's copy.
//!
//! Architectural decisions:
//! - Newer timestamp wins; equal timestamps fall back to place count
//! - Full tie favours the server as source of truth
//! - Merged timestamp never regresses
//! - Resync is flagged only when local is strictly newer than remote
//!
//! Deterministic, pure logic. No IO. No clock.

mod engine;
mod types;
mod watermark;

pub use engine::{local_wins, merge_quiz_results};
pub use types::*;
pub use watermark::{GenerationTicket, RefreshGeneration};
