//! Scenario: Sync queue flush classification
//!
//! # Invariants under test
//!
//! 1. Flush with nothing queued is an idle success and makes no push.
//! 2. Successful push marks the record synced, stamps last_synced_at and
//!    drops the queue entry.
//! 3. Transient failures keep the entry, bump attempts and report retriable.
//! 4. Permanent rejection marks the record failed and drops the entry.
//! 5. Missing token is a retriable Unauthenticated outcome with no push.
//! 6. A token remembered at enqueue time is used by a later flush.
//! 7. A queued entry with no record is dropped as idle.
//! 8. A newer result written while a push is in flight is neither
//!    overwritten nor dequeued, whether the push succeeds or is rejected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tqs_cache::{
    ChangeFeed, EnqueueOptions, FlushRequest, FlushStatus, LocalResultCache, MemoryStore,
    PersistOptions,
};
use tqs_remote::{PushAck, PushError, RemoteResultSource};
use tqs_schemas::{Place, QuizResult, SyncStatus, TravelType};

// ---------------------------------------------------------------------------
// Scripted remote
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedRemote {
    replies: Mutex<VecDeque<Result<PushAck, PushError>>>,
    pushes: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedRemote {
    fn reply(&self, r: Result<PushAck, PushError>) {
        self.replies.lock().unwrap().push_back(r);
    }

    fn pushes(&self) -> Vec<(String, Option<String>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteResultSource for ScriptedRemote {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, _account_id: &str, _auth_token: Option<&str>) -> Option<QuizResult> {
        None
    }

    async fn push(
        &self,
        account_id: &str,
        _result: &QuizResult,
        auth_token: Option<&str>,
    ) -> Result<PushAck, PushError> {
        self.pushes
            .lock()
            .unwrap()
            .push((account_id.to_string(), auth_token.map(str::to_string)));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(PushAck { status: 200 }))
    }
}

/// Push that parks until released, then answers with a fixed reply.
struct ParkedRemote {
    reply: Result<PushAck, PushError>,
    entered: Notify,
    release: Notify,
}

impl ParkedRemote {
    fn new(reply: Result<PushAck, PushError>) -> Self {
        Self {
            reply,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteResultSource for ParkedRemote {
    fn source_name(&self) -> &'static str {
        "parked"
    }

    async fn fetch(&self, _account_id: &str, _auth_token: Option<&str>) -> Option<QuizResult> {
        None
    }

    async fn push(
        &self,
        _account_id: &str,
        _result: &QuizResult,
        _auth_token: Option<&str>,
    ) -> Result<PushAck, PushError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.reply.clone()
    }
}

fn setup() -> (LocalResultCache, Arc<ScriptedRemote>) {
    let remote = Arc::new(ScriptedRemote::default());
    let cache = LocalResultCache::new(
        Arc::new(MemoryStore::new()),
        ChangeFeed::default(),
        remote.clone(),
    );
    (cache, remote)
}

fn result() -> QuizResult {
    QuizResult::new(
        Some(TravelType::new("ADV01", "Adventurer")),
        vec![Place::new("p1", "Lisbon")],
        1_000,
    )
}

fn persist_pending(cache: &LocalResultCache, account: &str) {
    cache
        .persist(
            account,
            &result(),
            PersistOptions {
                status: SyncStatus::Pending,
                last_synced_at: None,
                emit_event: false,
            },
        )
        .unwrap();
}

fn flush_req(account: &str, token: Option<&str>) -> FlushRequest {
    FlushRequest {
        account_id: account.to_string(),
        auth_token: token.map(str::to_string),
        force: false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nothing_queued_is_idle() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");

    let out = cache.flush_pending(flush_req("acc", Some("t"))).await.unwrap();
    assert!(out.success);
    assert_eq!(out.status, FlushStatus::Idle);
    assert!(remote.pushes().is_empty());
}

#[tokio::test]
async fn success_marks_synced_and_dequeues() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");
    cache.enqueue_sync("acc", Some("tok"), EnqueueOptions::default()).unwrap();

    let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
    assert!(out.success);
    assert_eq!(out.status, FlushStatus::Synced);

    let rec = cache.resolve("acc").into_record().unwrap();
    assert_eq!(rec.sync_status, SyncStatus::Synced);
    assert!(rec.last_synced_at.is_some());
    assert!(cache.pending_accounts().is_empty());
    // token remembered at enqueue time
    assert_eq!(remote.pushes(), vec![("acc".to_string(), Some("tok".to_string()))]);
}

#[tokio::test]
async fn transient_failure_keeps_entry() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");
    cache.enqueue_sync("acc", Some("tok"), EnqueueOptions::default()).unwrap();
    remote.reply(Err(PushError::Server { status: 503 }));
    remote.reply(Err(PushError::Timeout));

    for expected_attempts in 1..=2 {
        let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
        assert!(!out.success);
        assert!(out.retriable);
        assert_eq!(out.status, FlushStatus::Transient);
        assert_eq!(cache.queued("acc").unwrap().attempts, expected_attempts);
    }

    let rec = cache.resolve("acc").into_record().unwrap();
    assert_eq!(rec.sync_status, SyncStatus::Pending);

    let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
    assert_eq!(out.status, FlushStatus::Synced);
    assert!(cache.queued("acc").is_none());
}

#[tokio::test]
async fn permanent_rejection_marks_failed() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");
    cache.enqueue_sync("acc", Some("tok"), EnqueueOptions::default()).unwrap();
    remote.reply(Err(PushError::Rejected {
        status: 422,
        message: "incomplete".into(),
    }));

    let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
    assert!(!out.success);
    assert!(!out.retriable);
    assert_eq!(out.status, FlushStatus::Rejected);
    assert!(out.message.unwrap().contains("incomplete"));

    let rec = cache.resolve("acc").into_record().unwrap();
    assert_eq!(rec.sync_status, SyncStatus::Failed);
    assert!(cache.pending_accounts().is_empty());
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");
    cache.enqueue_sync("acc", None, EnqueueOptions::default()).unwrap();

    let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
    assert!(!out.success);
    assert!(out.retriable);
    assert_eq!(out.status, FlushStatus::Unauthenticated);
    assert!(remote.pushes().is_empty());
    assert!(cache.queued("acc").is_some());
}

#[tokio::test]
async fn queued_without_record_is_dropped() {
    let (cache, remote) = setup();
    cache.enqueue_sync("acc", Some("tok"), EnqueueOptions::default()).unwrap();

    let out = cache.flush_pending(flush_req("acc", None)).await.unwrap();
    assert!(out.success);
    assert_eq!(out.status, FlushStatus::Idle);
    assert!(cache.queued("acc").is_none());
    assert!(remote.pushes().is_empty());
}

#[tokio::test]
async fn force_pushes_without_queue_entry() {
    let (cache, remote) = setup();
    persist_pending(&cache, "acc");

    let out = cache
        .flush_pending(FlushRequest {
            account_id: "acc".into(),
            auth_token: Some("tok".into()),
            force: true,
        })
        .await
        .unwrap();
    assert_eq!(out.status, FlushStatus::Synced);
    assert_eq!(remote.pushes().len(), 1);
}

async fn newer_result_during_push(reply: Result<PushAck, PushError>) -> FlushStatus {
    let remote = Arc::new(ParkedRemote::new(reply));
    let cache = LocalResultCache::new(
        Arc::new(MemoryStore::new()),
        ChangeFeed::default(),
        remote.clone(),
    );
    persist_pending(&cache, "acc");
    cache
        .enqueue_sync("acc", Some("tok"), EnqueueOptions::default())
        .unwrap();

    let newer = QuizResult::new(
        Some(TravelType::new("NEW02", "Nomad")),
        vec![Place::new("p9", "Kyoto")],
        2_000,
    );

    let write_newer = async {
        remote.entered.notified().await;
        cache
            .persist(
                "acc",
                &newer,
                PersistOptions {
                    status: SyncStatus::Pending,
                    last_synced_at: None,
                    emit_event: false,
                },
            )
            .unwrap();
        cache
            .enqueue_sync("acc", Some("tok"), EnqueueOptions::default())
            .unwrap();
        remote.release.notify_one();
    };
    let (out, ()) = tokio::join!(cache.flush_pending(flush_req("acc", None)), write_newer);
    let out = out.unwrap();

    let rec = cache.resolve("acc").into_record().expect("record kept");
    assert_eq!(rec.result, newer);
    assert_eq!(rec.sync_status, SyncStatus::Pending);
    assert!(cache.queued("acc").is_some(), "newer result must stay queued");
    out.status
}

#[tokio::test]
async fn rejection_during_newer_write_keeps_newer_result() {
    let status = newer_result_during_push(Err(PushError::Rejected {
        status: 422,
        message: "bad".into(),
    }))
    .await;
    assert_eq!(status, FlushStatus::Rejected);
}

#[tokio::test]
async fn success_during_newer_write_keeps_newer_result() {
    let status = newer_result_during_push(Ok(PushAck { status: 200 })).await;
    assert_eq!(status, FlushStatus::Synced);
}
