//! Quiz status reconciliation controller.
//!
//! # Invariants
//!
//! - **Single flight**: at most one refresh runs at a time. A concurrent call
//!   returns `Skipped { InFlight }` without touching state.
//! - **Rate limited**: a non-forced refresh within `min_refresh_interval` of
//!   the last attempt is skipped.
//! - **Local before remote**: the local cache is applied before the remote is
//!   consulted, and a null remote never downgrades an applied local result.
//! - **Generation checked**: results are committed only while the refresh's
//!   generation ticket is current. Clearing an account, recording a local
//!   result or an identity change advance the generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::watch;
use tokio::time::Instant;
use tqs_cache::{
    ChangeEvent, EnqueueOptions, FlushRequest, FlushStatus, LocalResultCache, PersistOptions,
    Subscription,
};
use tqs_config::SyncConfig;
use tqs_reconcile::{merge_quiz_results, GenerationTicket, MergeSource, RefreshGeneration};
use tqs_schemas::{QuizResult, ResolvedState, SyncStatus};
use tracing::{debug, error, info, warn};

use crate::identity::{Identity, IdentityProvider};
use crate::view::{QuizStatusView, RefreshOutcome, SkipReason};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub min_refresh_interval: Duration,
    pub modal_wait_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_millis(5_000),
            modal_wait_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            min_refresh_interval: cfg.min_refresh_interval(),
            modal_wait_timeout: cfg.modal_wait_timeout(),
        }
    }
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct ReconciliationController {
    settings: ControllerSettings,
    cache: Arc<LocalResultCache>,
    identity: Arc<dyn IdentityProvider>,
    in_flight: AtomicBool,
    last_attempt: Mutex<Option<Instant>>,
    generation: Mutex<RefreshGeneration>,
    modal_pending: AtomicBool,
    view_tx: watch::Sender<QuizStatusView>,
}

impl ReconciliationController {
    pub fn new(
        settings: ControllerSettings,
        cache: Arc<LocalResultCache>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (view_tx, _rx) = watch::channel(QuizStatusView::default());
        Self {
            settings,
            cache,
            identity,
            in_flight: AtomicBool::new(false),
            last_attempt: Mutex::new(None),
            generation: Mutex::new(RefreshGeneration::new()),
            modal_pending: AtomicBool::new(false),
            view_tx,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<LocalResultCache> {
        &self.cache
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    // -----------------------------------------------------------------------
    // View
    // -----------------------------------------------------------------------

    pub fn view(&self) -> QuizStatusView {
        self.view_tx.borrow().clone()
    }

    pub fn status(&self) -> ResolvedState {
        self.view_tx.borrow().status
    }

    pub fn watch(&self) -> watch::Receiver<QuizStatusView> {
        self.view_tx.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn modal_pending(&self) -> bool {
        self.modal_pending.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.lock_generation().map(|g| g.current()).unwrap_or(0)
    }

    pub fn open_modal(&self) {
        self.view_tx.send_if_modified(|v| !std::mem::replace(&mut v.is_modal_open, true));
    }

    pub fn close_modal(&self) {
        self.view_tx.send_if_modified(|v| std::mem::replace(&mut v.is_modal_open, false));
    }

    fn set_state(
        view: &mut QuizStatusView,
        account_id: Option<&str>,
        state: ResolvedState,
        result: Option<QuizResult>,
    ) {
        if view.status != state {
            info!(
                account_id = account_id.unwrap_or("-"),
                from = view.status.as_str(),
                to = state.as_str(),
                "quiz status transition"
            );
        }
        view.status = state;
        view.quiz_result = result;
        view.account_id = account_id.map(str::to_string);
    }

    fn lock_generation(&self) -> Result<MutexGuard<'_, RefreshGeneration>> {
        self.generation
            .lock()
            .map_err(|_| anyhow!("refresh generation lock poisoned"))
    }

    fn issue_ticket(&self) -> Result<GenerationTicket> {
        Ok(self.lock_generation()?.issue())
    }

    /// Apply `state` to the view only if `ticket` is still current. The
    /// generation lock is held across the check and the write.
    fn apply_if_current(
        &self,
        ticket: GenerationTicket,
        account_id: &str,
        state: ResolvedState,
        result: Option<QuizResult>,
    ) -> Result<bool> {
        let gen = self.lock_generation()?;
        if !gen.is_current(ticket) {
            return Ok(false);
        }
        self.view_tx
            .send_modify(|v| Self::set_state(v, Some(account_id), state, result));
        drop(gen);
        Ok(true)
    }

    /// Invalidate in-flight refreshes and then reset the view with `reset`.
    fn advance_generation(
        &self,
        reason: &str,
        reset: impl FnOnce(&mut QuizStatusView),
    ) -> Result<u64> {
        let mut gen = self.lock_generation()?;
        let next = gen.advance();
        self.view_tx.send_modify(reset);
        drop(gen);
        debug!(generation = next, reason, "refresh generation advanced");
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Run the reconciliation algorithm once. Never returns an error; failures
    /// are logged and reported as [`RefreshOutcome::Failed`].
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("refresh skipped: already in flight");
            return RefreshOutcome::Skipped {
                reason: SkipReason::InFlight,
            };
        };

        match self.begin_attempt(force) {
            Ok(Some(skip)) => return skip,
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "refresh failed before start");
                return RefreshOutcome::Failed;
            }
        }

        let Some(identity) = self.identity.current() else {
            debug!("refresh deferred: no identity yet");
            self.view_tx.send_if_modified(|v| {
                if v.status == ResolvedState::Pending {
                    false
                } else {
                    Self::set_state(v, None, ResolvedState::Pending, None);
                    true
                }
            });
            return RefreshOutcome::AwaitingIdentity;
        };

        if let Ok(mut last) = self.last_attempt.lock() {
            *last = Some(Instant::now());
        }

        match self.run_refresh(&identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(account_id = %identity.account_id, error = %e, "refresh failed");
                RefreshOutcome::Failed
            }
        }
    }

    fn begin_attempt(&self, force: bool) -> Result<Option<RefreshOutcome>> {
        if force {
            return Ok(None);
        }
        let last = self
            .last_attempt
            .lock()
            .map_err(|_| anyhow!("last attempt lock poisoned"))?;
        match *last {
            Some(at) if at.elapsed() < self.settings.min_refresh_interval => {
                debug!("refresh skipped: rate limited");
                Ok(Some(RefreshOutcome::Skipped {
                    reason: SkipReason::RateLimited,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn run_refresh(&self, identity: &Identity) -> Result<RefreshOutcome> {
        let ticket = self.issue_ticket()?;
        let account_id = identity.account_id.as_str();
        let token = identity.auth_token.as_deref();

        // Local first.
        let lookup = self.cache.resolve(account_id);
        let local_status = lookup.status();
        let mut local = lookup.into_record().map(|r| r.result);

        let mut local_applied = false;
        if let Some(l) = local.as_ref().filter(|l| l.is_complete()) {
            let applied = self.apply_if_current(
                ticket,
                account_id,
                ResolvedState::Completed,
                Some(l.clone()),
            )?;
            if !applied {
                return Ok(RefreshOutcome::Superseded);
            }
            local_applied = true;
        }

        if let Some(status) = local_status.filter(SyncStatus::needs_flush) {
            self.flush_local(account_id, token, status).await?;
            // A flush may have rewritten the record.
            local = self.cache.resolve(account_id).into_record().map(|r| r.result);
        }

        let remote = self.cache.remote().fetch(account_id, token).await;

        self.commit(ticket, identity, local.as_ref(), remote.as_ref(), local_applied)
    }

    async fn flush_local(
        &self,
        account_id: &str,
        token: Option<&str>,
        status: SyncStatus,
    ) -> Result<()> {
        let out = self
            .cache
            .flush_pending(FlushRequest {
                account_id: account_id.to_string(),
                auth_token: token.map(str::to_string),
                force: true,
            })
            .await?;

        if out.success {
            if status == SyncStatus::Stale && out.status == FlushStatus::Synced {
                info!(account_id, "stale server copy resynced");
            }
        } else if out.retriable {
            self.cache
                .enqueue_sync(account_id, token, EnqueueOptions::default())?;
        } else {
            warn!(
                account_id,
                message = out.message.as_deref().unwrap_or(""),
                "local result rejected by server; left failed"
            );
        }
        Ok(())
    }

    /// Merge, persist and apply. Runs under the generation lock.
    fn commit(
        &self,
        ticket: GenerationTicket,
        identity: &Identity,
        local: Option<&QuizResult>,
        remote: Option<&QuizResult>,
        local_applied: bool,
    ) -> Result<RefreshOutcome> {
        let account_id = identity.account_id.as_str();
        let gen = self.lock_generation()?;
        if !gen.is_current(ticket) {
            debug!(account_id, "refresh superseded; discarding results");
            return Ok(RefreshOutcome::Superseded);
        }

        if let Some(remote) = remote {
            let merged = merge_quiz_results(local, Some(remote));
            if let Some(result) = merged.result.as_ref().filter(|r| r.is_complete()) {
                let status = merged.persist_status();
                let last_synced_at = (status == SyncStatus::Synced).then(now_ms);
                self.cache.persist(
                    account_id,
                    result,
                    PersistOptions {
                        status,
                        last_synced_at,
                        emit_event: false,
                    },
                )?;
                if merged.needs_resync {
                    debug!(account_id, "server copy older than local; resync queued");
                    self.cache.enqueue_sync(
                        account_id,
                        identity.auth_token.as_deref(),
                        EnqueueOptions { force: true },
                    )?;
                }
                let result = result.clone();
                self.view_tx.send_modify(|v| {
                    Self::set_state(v, Some(account_id), ResolvedState::Completed, Some(result))
                });
                return Ok(RefreshOutcome::Completed {
                    source: merged.source,
                });
            }
        }

        if local_applied {
            return Ok(RefreshOutcome::Completed {
                source: MergeSource::Local,
            });
        }

        self.view_tx
            .send_modify(|v| Self::set_state(v, Some(account_id), ResolvedState::Missing, None));
        drop(gen);
        Ok(RefreshOutcome::Missing)
    }

    // -----------------------------------------------------------------------
    // Modal coordination
    // -----------------------------------------------------------------------

    /// Open the result modal once data is loaded. Always opens: in
    /// `completed` when a result resolves, otherwise in `missing`.
    pub async fn request_open_modal(&self) -> ResolvedState {
        if self.view_tx.borrow().has_completed_result() {
            self.open_modal();
            return ResolvedState::Completed;
        }

        self.modal_pending.store(true, Ordering::Release);
        let state = self.settle_for_modal().await;
        self.modal_pending.store(false, Ordering::Release);

        let state = if state == ResolvedState::Completed {
            state
        } else {
            self.view_tx.send_if_modified(|v| {
                if v.status == ResolvedState::Completed {
                    return false;
                }
                let account = v.account_id.clone();
                Self::set_state(v, account.as_deref(), ResolvedState::Missing, None);
                true
            });
            self.status()
        };
        self.open_modal();
        state
    }

    async fn settle_for_modal(&self) -> ResolvedState {
        if self.identity.current().is_none() && self.identity.bootstrap().await.is_none() {
            debug!("modal requested before identity bootstrap finished");
        }

        if self.refresh(true).await == RefreshOutcome::Failed {
            return ResolvedState::Missing;
        }

        let mut rx = self.view_tx.subscribe();
        let waited = tokio::time::timeout(
            self.settings.modal_wait_timeout,
            rx.wait_for(|v| v.status.is_settled()),
        )
        .await;
        match waited {
            Ok(Ok(view)) => view.status,
            Ok(Err(_)) => ResolvedState::Missing,
            Err(_) => {
                warn!("quiz status did not settle in time; opening modal as missing");
                ResolvedState::Missing
            }
        }
    }

    // -----------------------------------------------------------------------
    // Change notification
    // -----------------------------------------------------------------------

    /// Signal that a quiz result was just produced for the current account.
    pub fn emit(&self) -> usize {
        match self.identity.current() {
            Some(id) => self.cache.feed().publish(ChangeEvent::ResultProduced {
                account_id: id.account_id,
            }),
            None => {
                debug!("emit ignored: no identity");
                0
            }
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        self.cache.feed().subscribe_fn(callback)
    }

    /// `true` when an event for `account_id` concerns the current identity.
    pub(crate) fn concerns_current(&self, account_id: &str) -> bool {
        self.identity
            .current()
            .map_or(true, |id| id.account_id == account_id)
    }

    // -----------------------------------------------------------------------
    // Local writes
    // -----------------------------------------------------------------------

    /// A quiz just completed on this device: persist it `pending`, queue a
    /// push, show it, and notify listeners.
    pub fn record_local_result(&self, result: QuizResult) -> Result<()> {
        if !result.is_complete() {
            bail!("quiz result has no travel type code");
        }
        let identity = self
            .identity
            .current()
            .ok_or_else(|| anyhow!("cannot record quiz result without an identity"))?;
        let account_id = identity.account_id.as_str();

        self.cache.persist(
            account_id,
            &result,
            PersistOptions {
                status: SyncStatus::Pending,
                last_synced_at: None,
                emit_event: false,
            },
        )?;
        self.cache
            .enqueue_sync(account_id, identity.auth_token.as_deref(), EnqueueOptions::default())?;

        self.advance_generation("local result recorded", |v| {
            Self::set_state(v, Some(account_id), ResolvedState::Completed, Some(result))
        })?;
        self.emit();
        Ok(())
    }

    /// Sign-out / account reset.
    ///
    /// Cache clear and generation advance happen under one generation lock:
    /// a ticket issued before the clear never commits, one issued after it
    /// never sees the cleared record.
    pub fn clear_quiz_data(&self, account_id: &str) -> Result<()> {
        let mut gen = self.lock_generation()?;
        let cleared = self.cache.clear(account_id);
        let next = gen.advance();
        self.view_tx.send_modify(|v| {
            if v.account_id.as_deref().map_or(true, |a| a == account_id) {
                Self::set_state(v, Some(account_id), ResolvedState::Missing, None);
            }
        });
        drop(gen);
        debug!(generation = next, account_id, "refresh generation advanced on clear");
        cleared
    }

    /// Identity changed: drop whatever belonged to the previous account.
    pub(crate) fn on_identity_changed(&self, identity: Option<&Identity>) -> Result<()> {
        let account_id = identity.map(|i| i.account_id.clone());
        self.advance_generation("identity changed", |v| {
            if v.account_id != account_id {
                Self::set_state(v, account_id.as_deref(), ResolvedState::Pending, None);
            }
        })?;
        Ok(())
    }
}
