//! tqs-cache
//!
//! Device-local persistence for quiz results, scoped per account:
//!
//! - [`store`]: synchronous key-value backends (memory, one-file-per-key).
//! - [`cache`]: [`LocalResultCache`], the record / sync-queue / flush layer.
//! - [`feed`]: [`ChangeFeed`], the cross-context change notification channel.
//!
//! Reads never fail from the caller's point of view; a broken or absent
//! record reads as `Missing`.

pub mod cache;
pub mod feed;
pub mod store;

pub use cache::{
    CacheLookup, EnqueueOptions, FlushOutcome, FlushRequest, FlushStatus, LocalResultCache,
    PersistOptions, QueuedSync,
};
pub use feed::{ChangeEvent, ChangeFeed, Subscription};
pub use store::{FileStore, KeyValueStore, MemoryStore};
