use serde::{Deserialize, Serialize};
use tqs_schemas::{QuizResult, SyncStatus};

/// Which side supplied the winning result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeSource {
    /// Neither side had a result.
    None,
    Local,
    Remote,
}

impl MergeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeSource::None => "none",
            MergeSource::Local => "local",
            MergeSource::Remote => "remote",
        }
    }
}

/// Result of [`merge_quiz_results`](crate::merge_quiz_results).
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub result: Option<QuizResult>,
    pub source: MergeSource,
    /// Server copy is older than local and must be pushed.
    pub needs_resync: bool,
}

impl MergeOutcome {
    pub fn none() -> Self {
        Self {
            result: None,
            source: MergeSource::None,
            needs_resync: false,
        }
    }

    /// `true` when the merged result carries a usable travel-type code.
    pub fn is_complete(&self) -> bool {
        self.result.as_ref().is_some_and(QuizResult::is_complete)
    }

    /// Status the merged record should be persisted with.
    pub fn persist_status(&self) -> SyncStatus {
        match self.source {
            MergeSource::Remote => SyncStatus::Synced,
            MergeSource::Local | MergeSource::None => SyncStatus::Pending,
        }
    }
}
