//! Rust library to turn remote mailboxes into deduplicated
//! conversation threads.
//!
//! Messages are listed from a [`Provider`], normalized, resolved to a
//! thread by a cascade of matching layers, then persisted in a SQLite
//! [`Store`]. See [`Orchestrator`] for the entry point.

pub mod domain;
pub use domain::*;

pub mod index;
pub use index::{MemoryIndex, NoopIndex, SearchIndex};

pub mod provider;
pub use provider::{MemoryProvider, Op, Page, PageRequest, Provider, RemoteMatch, RetryPolicy};

pub mod recovery;
pub use recovery::{Body, ContentFetcher, IdentityRecovery, Reason};

pub mod store;
pub use store::Store;

pub mod sync;
pub use sync::{
    Applied, CancelToken, Interruption, Orchestrator, QueueStats, ResyncQueue, ResyncRequest,
    SyncConfig, SyncMode, SyncProgressEvent, SyncReport,
};
