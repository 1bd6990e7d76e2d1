use serde::Serialize;
use tqs_reconcile::MergeSource;
use tqs_schemas::{QuizResult, ResolvedState};

/// What a UI consumer renders. Published through a watch channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStatusView {
    pub status: ResolvedState,
    pub quiz_result: Option<QuizResult>,
    pub is_modal_open: bool,
    pub account_id: Option<String>,
}

impl Default for QuizStatusView {
    fn default() -> Self {
        Self {
            status: ResolvedState::Pending,
            quiz_result: None,
            is_modal_open: false,
            account_id: None,
        }
    }
}

impl QuizStatusView {
    /// `true` when the view shows a complete result.
    pub fn has_completed_result(&self) -> bool {
        self.status == ResolvedState::Completed
            && self.quiz_result.as_ref().is_some_and(QuizResult::is_complete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    RateLimited,
}

/// How a call to `refresh` ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Skipped { reason: SkipReason },
    /// No account identity yet; state left `pending`.
    AwaitingIdentity,
    /// State is `completed`. `source` is the side that supplied the result.
    Completed { source: MergeSource },
    Missing,
    /// Account cleared or identity changed mid-refresh; results discarded.
    Superseded,
    /// Orchestration error. Logged; state untouched.
    Failed,
}

impl RefreshOutcome {
    pub fn was_skipped(&self) -> bool {
        matches!(self, RefreshOutcome::Skipped { .. })
    }
}
