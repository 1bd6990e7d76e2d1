//! tqs-schemas
//!
//! Shared data model for the quiz-status workspace: the canonical
//! [`QuizResult`], its persisted [`CacheRecord`] wrapper, the three-way
//! [`ResolvedState`] exposed to consumers, and the remote wire shapes
//! (see [`wire`]).
//!
//! Pure types. No IO.

pub mod wire;

use serde::{Deserialize, Serialize};

pub use wire::{to_push_payload, to_stored_quiz_result, QuizStateResponse, RemoteQuizState};

/// Current on-disk schema version for [`CacheRecord`].
pub const CACHE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Travel type / places
// ---------------------------------------------------------------------------

/// Classification code plus display metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelType {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
}

impl TravelType {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            emoji: None,
            short_description: None,
            long_description: None,
        }
    }

    /// `true` when the code is non-empty after trimming.
    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// A recommended location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Place {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            latitude: None,
            longitude: None,
            category: None,
        }
    }
}

// ---------------------------------------------------------------------------
// QuizResult
// ---------------------------------------------------------------------------

/// The canonical unit of quiz state.
///
/// `timestamp` is the logical clock (epoch ms) of when the result was
/// produced, not when it was stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    #[serde(default)]
    pub travel_type: Option<TravelType>,
    #[serde(default)]
    pub places: Vec<Place>,
    /// Raw quiz answers. Opaque; carried through merges unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl QuizResult {
    pub fn new(travel_type: Option<TravelType>, places: Vec<Place>, timestamp: i64) -> Self {
        Self {
            travel_type,
            places,
            answers: None,
            timestamp,
        }
    }

    pub fn with_answers(mut self, answers: serde_json::Value) -> Self {
        self.answers = Some(answers);
        self
    }

    /// A result is complete only when it carries a non-empty travel-type code.
    /// Incomplete results must never be surfaced as `completed`.
    pub fn is_complete(&self) -> bool {
        self.travel_type.as_ref().is_some_and(TravelType::has_code)
    }

    pub fn travel_type_code(&self) -> Option<&str> {
        self.travel_type
            .as_ref()
            .filter(|t| t.has_code())
            .map(|t| t.code.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cache record
// ---------------------------------------------------------------------------

/// Sync status of a locally cached result relative to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Server has confirmed this result.
    Synced,
    /// Produced locally, not yet confirmed.
    Pending,
    /// Known to diverge from the server; must be re-pushed.
    Stale,
    /// Server permanently rejected the last push.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Stale => "stale",
            SyncStatus::Failed => "failed",
        }
    }

    /// `pending`, `failed` and `stale` records are candidates for a flush.
    pub fn needs_flush(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

/// Persisted wrapper around a [`QuizResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub result: QuizResult,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub last_synced_at: Option<i64>,
}

fn default_schema_version() -> u32 {
    CACHE_SCHEMA_VERSION
}

impl CacheRecord {
    pub fn new(result: QuizResult, sync_status: SyncStatus, last_synced_at: Option<i64>) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            result,
            sync_status,
            last_synced_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved state
// ---------------------------------------------------------------------------

/// Three-way status exposed to consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedState {
    /// Still determining.
    Pending,
    /// A complete quiz result is available.
    Completed,
    /// Determined that no valid result exists locally or remotely.
    Missing,
}

impl ResolvedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedState::Pending => "pending",
            ResolvedState::Completed => "completed",
            ResolvedState::Missing => "missing",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, ResolvedState::Pending)
    }
}
