//! Account-scoped local result cache with a durable pending-sync queue.
//!
//! # Invariants
//!
//! - **resolve never fails**: storage or decode errors are logged and read as
//!   `Missing`.
//! - **Queue is idempotent per account**: enqueueing twice leaves one entry.
//! - **Queue survives restarts**: entries live in the store next to records.
//!   Auth tokens do not; they are held in memory only.
//! - **Synced means the pushed result**: a flush marks the record `synced`
//!   only if the record still holds the result that was pushed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tqs_remote::RemoteResultSource;
use tqs_schemas::{CacheRecord, QuizResult, SyncStatus};
use tracing::{debug, info, warn};

use crate::feed::{ChangeEvent, ChangeFeed};
use crate::store::KeyValueStore;

const RECORD_KEY_PREFIX: &str = "quiz-result:";
const QUEUE_KEY: &str = "quiz-sync-queue";

fn record_key(account_id: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{account_id}")
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of [`LocalResultCache::resolve`].
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
    Missing,
    Found {
        status: SyncStatus,
        record: CacheRecord,
    },
}

impl CacheLookup {
    pub fn record(&self) -> Option<&CacheRecord> {
        match self {
            CacheLookup::Missing => None,
            CacheLookup::Found { record, .. } => Some(record),
        }
    }

    pub fn into_record(self) -> Option<CacheRecord> {
        match self {
            CacheLookup::Missing => None,
            CacheLookup::Found { record, .. } => Some(record),
        }
    }

    pub fn status(&self) -> Option<SyncStatus> {
        match self {
            CacheLookup::Missing => None,
            CacheLookup::Found { status, .. } => Some(*status),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistOptions {
    pub status: SyncStatus,
    pub last_synced_at: Option<i64>,
    /// Publish [`ChangeEvent::Stored`] after writing.
    pub emit_event: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub force: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushRequest {
    pub account_id: String,
    pub auth_token: Option<String>,
    /// Push the cached record even if nothing is queued.
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStatus {
    /// Nothing to push.
    Idle,
    /// Server accepted the push; record is `synced`.
    Synced,
    /// No auth token available to push with.
    Unauthenticated,
    /// Transient failure; will be retried.
    Transient,
    /// Permanent rejection; record is `failed`.
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushOutcome {
    pub success: bool,
    pub retriable: bool,
    pub status: FlushStatus,
    pub message: Option<String>,
}

impl FlushOutcome {
    fn idle(message: &str) -> Self {
        Self {
            success: true,
            retriable: false,
            status: FlushStatus::Idle,
            message: Some(message.to_string()),
        }
    }
}

/// One queued sync. Keyed by account in the queue map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSync {
    pub account_id: String,
    pub force: bool,
    pub enqueued_at: i64,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SyncQueue {
    #[serde(default)]
    entries: BTreeMap<String, QueuedSync>,
}

// ---------------------------------------------------------------------------
// LocalResultCache
// ---------------------------------------------------------------------------

pub struct LocalResultCache {
    store: Arc<dyn KeyValueStore>,
    feed: ChangeFeed,
    remote: Arc<dyn RemoteResultSource>,
    /// Serializes queue read-modify-write. Never held across an await.
    queue_lock: Mutex<()>,
    tokens: Mutex<HashMap<String, String>>,
}

impl LocalResultCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        feed: ChangeFeed,
        remote: Arc<dyn RemoteResultSource>,
    ) -> Self {
        Self {
            store,
            feed,
            remote,
            queue_lock: Mutex::new(()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn remote(&self) -> &Arc<dyn RemoteResultSource> {
        &self.remote
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub fn resolve(&self, account_id: &str) -> CacheLookup {
        let raw = match self.store.get(&record_key(account_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Missing,
            Err(e) => {
                warn!(account_id, error = %e, "cache read failed; treating as missing");
                return CacheLookup::Missing;
            }
        };
        match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(record) => CacheLookup::Found {
                status: record.sync_status,
                record,
            },
            Err(e) => {
                warn!(account_id, error = %e, "cache record undecodable; treating as missing");
                CacheLookup::Missing
            }
        }
    }

    pub fn persist(
        &self,
        account_id: &str,
        result: &QuizResult,
        opts: PersistOptions,
    ) -> Result<()> {
        let record = CacheRecord::new(result.clone(), opts.status, opts.last_synced_at);
        let raw = serde_json::to_string(&record).context("serialize cache record failed")?;
        self.store
            .set(&record_key(account_id), &raw)
            .with_context(|| format!("persist cache record failed for account {account_id}"))?;
        debug!(account_id, status = opts.status.as_str(), "cache record persisted");
        if opts.emit_event {
            self.feed.publish(ChangeEvent::Stored {
                account_id: account_id.to_string(),
            });
        }
        Ok(())
    }

    /// Sign-out / account reset: drop the record, its queue entry and any
    /// remembered token, then publish [`ChangeEvent::Cleared`].
    pub fn clear(&self, account_id: &str) -> Result<()> {
        self.store
            .remove(&record_key(account_id))
            .with_context(|| format!("clear cache record failed for account {account_id}"))?;
        self.update_queue(|q| {
            q.entries.remove(account_id);
        })?;
        self.forget_token(account_id);
        info!(account_id, "local quiz data cleared");
        self.feed.publish(ChangeEvent::Cleared {
            account_id: account_id.to_string(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    fn load_queue(&self) -> Result<SyncQueue> {
        match self.store.get(QUEUE_KEY)? {
            None => Ok(SyncQueue::default()),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(q) => Ok(q),
                Err(e) => {
                    warn!(error = %e, "sync queue undecodable; starting empty");
                    Ok(SyncQueue::default())
                }
            },
        }
    }

    fn update_queue<T>(&self, f: impl FnOnce(&mut SyncQueue) -> T) -> Result<T> {
        let _guard = self
            .queue_lock
            .lock()
            .map_err(|_| anyhow!("sync queue lock poisoned"))?;
        let mut q = self.load_queue()?;
        let out = f(&mut q);
        let raw = serde_json::to_string(&q).context("serialize sync queue failed")?;
        self.store.set(QUEUE_KEY, &raw).context("persist sync queue failed")?;
        Ok(out)
    }

    fn remember_token(&self, account_id: &str, auth_token: Option<&str>) {
        if let (Some(token), Ok(mut tokens)) = (auth_token, self.tokens.lock()) {
            tokens.insert(account_id.to_string(), token.to_string());
        }
    }

    fn forget_token(&self, account_id: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(account_id);
        }
    }

    fn remembered_token(&self, account_id: &str) -> Option<String> {
        self.tokens
            .lock()
            .ok()
            .and_then(|t| t.get(account_id).cloned())
    }

    /// Record that the account's local result must be pushed. Idempotent:
    /// a second enqueue refreshes the token and ORs `force`, nothing more.
    pub fn enqueue_sync(
        &self,
        account_id: &str,
        auth_token: Option<&str>,
        opts: EnqueueOptions,
    ) -> Result<()> {
        self.remember_token(account_id, auth_token);
        let inserted = self.update_queue(|q| match q.entries.get_mut(account_id) {
            Some(existing) => {
                existing.force |= opts.force;
                false
            }
            None => {
                q.entries.insert(
                    account_id.to_string(),
                    QueuedSync {
                        account_id: account_id.to_string(),
                        force: opts.force,
                        enqueued_at: now_ms(),
                        attempts: 0,
                        last_error: None,
                    },
                );
                true
            }
        })?;
        if inserted {
            debug!(account_id, "sync enqueued");
        }
        Ok(())
    }

    pub fn queued(&self, account_id: &str) -> Option<QueuedSync> {
        match self.load_queue() {
            Ok(q) => q.entries.get(account_id).cloned(),
            Err(e) => {
                warn!(account_id, error = %e, "sync queue read failed");
                None
            }
        }
    }

    /// Accounts with a queued sync, in key order.
    pub fn pending_accounts(&self) -> Vec<String> {
        match self.load_queue() {
            Ok(q) => q.entries.keys().cloned().collect(),
            Err(e) => {
                warn!(error = %e, "sync queue read failed");
                Vec::new()
            }
        }
    }

    fn dequeue(&self, account_id: &str) -> Result<()> {
        self.update_queue(|q| {
            q.entries.remove(account_id);
        })
    }

    fn note_attempt(&self, account_id: &str, error: &str) -> Result<()> {
        self.update_queue(|q| {
            if let Some(entry) = q.entries.get_mut(account_id) {
                entry.attempts = entry.attempts.saturating_add(1);
                entry.last_error = Some(error.to_string());
            }
        })
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Push the queued (or, with `force`, the cached) result to the remote.
    ///
    /// Transient failures keep the queue entry and report `retriable`.
    /// Permanent rejections mark the record `failed` and drop the entry.
    /// Either terminal outcome touches the record only while it still holds
    /// the pushed result.
    pub async fn flush_pending(&self, req: FlushRequest) -> Result<FlushOutcome> {
        let account_id = req.account_id.as_str();
        let queued = self.queued(account_id);

        if queued.is_none() && !req.force {
            return Ok(FlushOutcome::idle("nothing queued"));
        }

        let record = match self.resolve(account_id).into_record() {
            Some(r) => r,
            None => {
                if queued.is_some() {
                    self.dequeue(account_id)?;
                }
                return Ok(FlushOutcome::idle("no cached result"));
            }
        };

        if record.sync_status == SyncStatus::Synced && queued.is_none() {
            return Ok(FlushOutcome::idle("already synced"));
        }

        let token = req
            .auth_token
            .clone()
            .or_else(|| self.remembered_token(account_id));
        let Some(token) = token else {
            debug!(account_id, "flush skipped: no auth token");
            return Ok(FlushOutcome {
                success: false,
                retriable: true,
                status: FlushStatus::Unauthenticated,
                message: Some("no auth token".to_string()),
            });
        };
        self.remember_token(account_id, Some(&token));

        let pushed = record.result;
        let outcome = self.remote.push(account_id, &pushed, Some(&token)).await;
        // A newer local result may have landed while the push was in flight;
        // only the pushed result may change status or leave the queue.
        let still_current = self
            .resolve(account_id)
            .record()
            .is_some_and(|r| r.result == pushed);
        match outcome {
            Ok(ack) => {
                if still_current {
                    self.persist(
                        account_id,
                        &pushed,
                        PersistOptions {
                            status: SyncStatus::Synced,
                            last_synced_at: Some(now_ms()),
                            emit_event: false,
                        },
                    )?;
                    self.dequeue(account_id)?;
                    info!(account_id, status = ack.status, "quiz result synced");
                } else {
                    debug!(account_id, "record changed during push; keeping queue entry");
                }
                Ok(FlushOutcome {
                    success: true,
                    retriable: false,
                    status: FlushStatus::Synced,
                    message: None,
                })
            }
            Err(e) if e.is_retriable() => {
                warn!(account_id, error = %e, "quiz result push failed; will retry");
                self.note_attempt(account_id, &e.to_string())?;
                Ok(FlushOutcome {
                    success: false,
                    retriable: true,
                    status: FlushStatus::Transient,
                    message: Some(e.to_string()),
                })
            }
            Err(e) => {
                warn!(account_id, error = %e, "quiz result push rejected");
                if still_current {
                    self.persist(
                        account_id,
                        &pushed,
                        PersistOptions {
                            status: SyncStatus::Failed,
                            last_synced_at: record.last_synced_at,
                            emit_event: false,
                        },
                    )?;
                    self.dequeue(account_id)?;
                } else {
                    debug!(account_id, "record changed during push; keeping newer result queued");
                }
                Ok(FlushOutcome {
                    success: false,
                    retriable: false,
                    status: FlushStatus::Rejected,
                    message: Some(e.to_string()),
                })
            }
        }
    }
}
