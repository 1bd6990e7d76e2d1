//! tqs-controller
//!
//! The quiz status reconciliation core: one explicit
//! [`ReconciliationController`] per process, shared as `Arc`, owning
//!
//! - the three-way status ([`ResolvedState`](tqs_schemas::ResolvedState))
//!   published through a watch channel as a [`QuizStatusView`],
//! - the single-flight, rate-limited refresh algorithm,
//! - modal-open coordination,
//! - change-feed, identity-feed and background sync tasks ([`tasks`]).
//!
//! Merge rules live in `tqs-reconcile`; persistence in `tqs-cache`.

pub mod controller;
pub mod identity;
pub mod tasks;
pub mod view;

pub use controller::{ControllerSettings, ReconciliationController};
pub use identity::{Identity, IdentityProvider, WatchIdentity};
pub use view::{QuizStatusView, RefreshOutcome, SkipReason};
