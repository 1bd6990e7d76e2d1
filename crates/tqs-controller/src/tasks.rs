//! Background tasks attached to a shared controller.
//!
//! Each `attach_*` / `spawn_*` returns the task's `JoinHandle`; aborting it
//! detaches the task. All of them require a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tqs_cache::{ChangeEvent, FlushRequest, FlushStatus};
use tracing::{debug, info, warn};

use crate::controller::ReconciliationController;
use crate::identity::Identity;

impl ReconciliationController {
    /// Re-run the refresh algorithm on change-feed events.
    ///
    /// `Stored` / `Cleared` come from another context writing the cache and
    /// trigger a normal (rate-limited) refresh. `ResultProduced` means a quiz
    /// was just completed and forces one.
    pub fn attach_change_feed(self: &Arc<Self>) -> JoinHandle<()> {
        let ctl = Arc::clone(self);
        let mut rx = self.cache().feed().subscribe();
        tokio::spawn(async move {
            loop {
                let ev = match rx.recv().await {
                    Ok(ev) => ev,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change listener lagged; forcing refresh");
                        ctl.refresh(true).await;
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !ctl.concerns_current(ev.account_id()) {
                    continue;
                }
                let force = matches!(ev, ChangeEvent::ResultProduced { .. });
                let outcome = ctl.refresh(force).await;
                debug!(?outcome, force, "refresh after change event");
            }
        })
    }

    /// Refresh whenever identity becomes available or changes account.
    pub fn attach_identity_feed(
        self: &Arc<Self>,
        mut rx: watch::Receiver<Option<Identity>>,
    ) -> JoinHandle<()> {
        let ctl = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_account = rx.borrow_and_update().as_ref().map(|i| i.account_id.clone());
            if last_account.is_some() {
                ctl.refresh(true).await;
            }
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                let account = current.as_ref().map(|i| i.account_id.clone());
                if account != last_account {
                    info!(
                        from = last_account.as_deref().unwrap_or("-"),
                        to = account.as_deref().unwrap_or("-"),
                        "identity changed"
                    );
                    if let Err(e) = ctl.on_identity_changed(current.as_ref()) {
                        warn!(error = %e, "identity change handling failed");
                    }
                    last_account = account;
                }
                if current.is_some() {
                    ctl.refresh(true).await;
                }
            }
        })
    }

    /// Retry queued pushes every `interval`. The current identity's token is
    /// used for its own account; other queued accounts fall back to the token
    /// remembered when they were enqueued.
    pub fn spawn_sync_worker(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ctl = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let identity = ctl.identity().current();
                for account_id in ctl.cache().pending_accounts() {
                    let auth_token = identity
                        .as_ref()
                        .filter(|i| i.account_id == account_id)
                        .and_then(|i| i.auth_token.clone());
                    let req = FlushRequest {
                        account_id: account_id.clone(),
                        auth_token,
                        force: false,
                    };
                    match ctl.cache().flush_pending(req).await {
                        Ok(out) if out.status == FlushStatus::Idle => {}
                        Ok(out) if out.success => {
                            info!(account_id = %account_id, "background sync pushed result");
                        }
                        Ok(out) => {
                            debug!(
                                account_id = %account_id,
                                status = ?out.status,
                                retriable = out.retriable,
                                "background sync did not complete"
                            );
                        }
                        Err(e) => {
                            warn!(account_id = %account_id, error = %e, "background sync failed");
                        }
                    }
                }
            }
        })
    }
}
