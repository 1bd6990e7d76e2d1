//! In-process fakes for end-to-end quiz status scenarios.
//!
//! - [`FakeRemote`]: scripted remote source that counts calls and can hold
//!   fetches open so tests can interleave concurrent refreshes.
//! - [`StaticIdentity`]: fixed identity provider.
//! - [`FaultyStore`]: memory store that can fail writes or run a hook on
//!   removal.
//! - [`Harness`]: a controller wired to a memory cache and a fake remote.

use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tokio::sync::{Notify, Semaphore};
use tqs_cache::{ChangeFeed, KeyValueStore, LocalResultCache, MemoryStore, PersistOptions};
use tqs_controller::{ControllerSettings, Identity, IdentityProvider, ReconciliationController};
use tqs_remote::{PushAck, PushError, RemoteResultSource};
use tqs_schemas::{Place, QuizResult, SyncStatus, TravelType};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Result with `n_places` generated places. `code = None` builds an
/// incomplete result.
pub fn quiz_result(code: Option<&str>, n_places: usize, timestamp: i64) -> QuizResult {
    QuizResult::new(
        code.map(|c| TravelType::new(c, c)),
        (1..=n_places)
            .map(|i| Place::new(format!("p{i}"), format!("Place {i}")))
            .collect(),
        timestamp,
    )
}

pub fn load_quiz_result_json(path: &str) -> Result<QuizResult> {
    let s = fs::read_to_string(path).with_context(|| format!("read quiz result: {path}"))?;
    serde_json::from_str(&s).context("parse quiz result json")
}

// ---------------------------------------------------------------------------
// FakeRemote
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<Option<QuizResult>>,
    push_replies: Mutex<VecDeque<Result<PushAck, PushError>>>,
    pushed: Mutex<Vec<(String, QuizResult)>>,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fetch_entered: Notify,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(result: QuizResult) -> Self {
        let r = Self::default();
        r.set_state(Some(result));
        r
    }

    pub fn set_state(&self, result: Option<QuizResult>) {
        if let Ok(mut s) = self.state.lock() {
            *s = result;
        }
    }

    /// Queue a reply for the next push. Without queued replies pushes are
    /// accepted and become the server state.
    pub fn reply_to_push(&self, reply: Result<PushAck, PushError>) {
        if let Ok(mut q) = self.push_replies.lock() {
            q.push_back(reply);
        }
    }

    /// The next `pushes` pushes fail with a transport error.
    pub fn go_offline(&self, pushes: usize) {
        for _ in 0..pushes {
            self.reply_to_push(Err(PushError::Transport("offline".into())));
        }
    }

    /// Make fetches block until [`FakeRemote::release_fetches`] is called.
    pub fn hold_fetches(&self) {
        if let Ok(mut g) = self.gate.lock() {
            *g = Some(Arc::new(Semaphore::new(0)));
        }
    }

    pub fn release_fetches(&self, n: usize) {
        if let Ok(g) = self.gate.lock() {
            if let Some(sem) = g.as_ref() {
                sem.add_permits(n);
            }
        }
    }

    /// Resolves once a fetch has started (including one already started).
    pub async fn fetch_entered(&self) {
        self.fetch_entered.notified().await;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<(String, QuizResult)> {
        self.pushed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RemoteResultSource for FakeRemote {
    fn source_name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, _account_id: &str, _auth_token: Option<&str>) -> Option<QuizResult> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_entered.notify_one();
        let gate = self.gate.lock().ok().and_then(|g| g.clone());
        if let Some(sem) = gate {
            if let Ok(permit) = sem.acquire().await {
                permit.forget();
            }
        }
        self.state.lock().ok().and_then(|s| s.clone())
    }

    async fn push(
        &self,
        account_id: &str,
        result: &QuizResult,
        _auth_token: Option<&str>,
    ) -> Result<PushAck, PushError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .push_replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Ok(PushAck { status: 200 }));
        if reply.is_ok() {
            if let Ok(mut p) = self.pushed.lock() {
                p.push((account_id.to_string(), result.clone()));
            }
            self.set_state(Some(result.clone()));
        }
        reply
    }
}

// ---------------------------------------------------------------------------
// StaticIdentity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Identity>);

impl StaticIdentity {
    pub fn signed_in(account_id: &str, auth_token: Option<&str>) -> Self {
        Self(Some(Identity::new(account_id, auth_token.map(str::to_string))))
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// FaultyStore
// ---------------------------------------------------------------------------

type RemoveHook = Box<dyn Fn(&str) + Send + Sync>;

/// [`MemoryStore`] with injectable write failures and a removal hook.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    on_remove: Mutex<Option<RemoveHook>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `set` returns an error and leaves the store untouched.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Run `hook(key)` before each removal is applied.
    pub fn on_remove(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if let Ok(mut h) = self.on_remove.lock() {
            *h = Some(Box::new(hook));
        }
    }
}

impl KeyValueStore for FaultyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure for {key}");
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(h) = self.on_remove.lock() {
            if let Some(hook) = h.as_ref() {
                hook(key);
            }
        }
        self.inner.remove(key)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Arc<FakeRemote>,
    pub cache: Arc<LocalResultCache>,
    pub controller: Arc<ReconciliationController>,
}

impl Harness {
    pub fn new(remote: FakeRemote, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_settings(remote, identity, ControllerSettings::default())
    }

    pub fn with_settings(
        remote: FakeRemote,
        identity: Arc<dyn IdentityProvider>,
        settings: ControllerSettings,
    ) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), remote, identity, settings)
    }

    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        remote: FakeRemote,
        identity: Arc<dyn IdentityProvider>,
        settings: ControllerSettings,
    ) -> Self {
        let remote = Arc::new(remote);
        let cache = Arc::new(LocalResultCache::new(
            store.clone(),
            ChangeFeed::default(),
            remote.clone() as Arc<dyn RemoteResultSource>,
        ));
        let controller = Arc::new(ReconciliationController::new(
            settings,
            cache.clone(),
            identity,
        ));
        Self {
            store,
            remote,
            cache,
            controller,
        }
    }

    /// Seed the local cache without emitting a change event.
    pub fn seed_local(
        &self,
        account_id: &str,
        result: &QuizResult,
        status: SyncStatus,
    ) -> Result<()> {
        self.cache.persist(
            account_id,
            result,
            PersistOptions {
                status,
                last_synced_at: None,
                emit_event: false,
            },
        )
    }

    pub fn local_status(&self, account_id: &str) -> Option<SyncStatus> {
        self.cache.resolve(account_id).status()
    }
}
