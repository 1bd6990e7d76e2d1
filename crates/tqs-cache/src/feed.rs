//! Change feed: publish / subscribe for cache changes.
//!
//! Other execution contexts observe cache writes through this feed instead of
//! a platform storage event. A bridge to any platform mechanism only has to
//! call [`ChangeFeed::publish`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Messages broadcast over the change feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A cache record was written with `emit_event`.
    Stored { account_id: String },
    /// The account's record was cleared (sign-out / reset).
    Cleared { account_id: String },
    /// A quiz result was just produced in-process.
    ResultProduced { account_id: String },
}

impl ChangeEvent {
    pub fn account_id(&self) -> &str {
        match self {
            ChangeEvent::Stored { account_id }
            | ChangeEvent::Cleared { account_id }
            | ChangeEvent::ResultProduced { account_id } => account_id,
        }
    }
}

/// Cloneable handle over a broadcast channel.
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<ChangeEvent>(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<ChangeEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Invoke `callback` for every subsequent event until the returned
    /// [`Subscription`] is dropped or unsubscribed. Requires a tokio runtime.
    pub fn subscribe_fn<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => callback(ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription {
            handle: Some(handle),
        }
    }
}

/// Handle returned by [`ChangeFeed::subscribe_fn`]. Dropping it detaches the
/// callback.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn detach(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
