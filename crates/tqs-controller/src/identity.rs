//! Identity provider contract.
//!
//! Identity may be unavailable when the controller is constructed. Callers
//! must tolerate `None` and re-trigger a refresh once it arrives (see
//! `ReconciliationController::attach_identity_feed`).

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

/// Account id plus an optional bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    pub auth_token: Option<String>,
}

impl Identity {
    pub fn new(account_id: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            account_id: account_id.into(),
            auth_token,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("account_id", &self.account_id)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Identity available right now, without waiting.
    fn current(&self) -> Option<Identity>;

    /// Wait for identity bootstrap to finish. Implementations must bound the
    /// wait; `None` means no identity is coming.
    async fn bootstrap(&self) -> Option<Identity> {
        self.current()
    }
}

/// Identity held in a watch channel. Sign-in / sign-out are `set` calls;
/// observers subscribe to the receiver.
#[derive(Debug)]
pub struct WatchIdentity {
    tx: watch::Sender<Option<Identity>>,
    bootstrap_wait: Duration,
}

impl WatchIdentity {
    pub fn new(initial: Option<Identity>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            bootstrap_wait: Duration::from_secs(2),
        }
    }

    pub fn with_bootstrap_wait(mut self, wait: Duration) -> Self {
        self.bootstrap_wait = wait;
        self
    }

    /// Replace the identity. Observers are notified only on change.
    pub fn set(&self, identity: Option<Identity>) {
        self.tx.send_if_modified(|cur| {
            if *cur == identity {
                false
            } else {
                *cur = identity;
                true
            }
        });
    }

    pub fn sign_in(&self, account_id: impl Into<String>, auth_token: Option<String>) {
        self.set(Some(Identity::new(account_id, auth_token)));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for WatchIdentity {
    fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    async fn bootstrap(&self) -> Option<Identity> {
        let mut rx = self.tx.subscribe();
        let identity = match tokio::time::timeout(self.bootstrap_wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(identity)) => identity.clone(),
            _ => None,
        };
        identity
    }
}
