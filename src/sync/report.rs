use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Represents the synchronization mode.
#[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq, Serialize)]
pub enum SyncMode {
    /// Fetches one bounded page.
    #[default]
    Incremental,
    /// Follows the continuations until the listing is exhausted.
    Full,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Represents the reason a batch stopped before exhausting the
/// listing.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub enum Interruption {
    RateLimited,
    Cancelled,
    /// A page could not be fetched within the retry budget.
    PageFailed(String),
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::PageFailed(reason) => write!(f, "page failed: {}", reason),
        }
    }
}

/// Represents the statistics of a synchronization batch.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct SyncReport {
    pub mailbox: String,
    pub mode: SyncMode,
    /// Represents the number of raw items received.
    pub fetched: usize,
    /// Represents the number of messages persisted for the first
    /// time.
    pub created: usize,
    /// Represents the number of messages already known and
    /// refreshed.
    pub updated: usize,
    /// Represents the number of items (or pages) that failed.
    pub failed: usize,
    pub pages: usize,
    /// True when the provider reported no further page.
    pub exhausted: bool,
    pub interruption: Option<Interruption>,
}

impl SyncReport {
    pub fn new(mailbox: &str, mode: SyncMode) -> Self {
        Self {
            mailbox: mailbox.to_owned(),
            mode,
            ..Self::default()
        }
    }

    /// Returns true if the listing was exhausted without
    /// interruption nor failure. Only complete batches advance the
    /// watermark.
    pub fn is_complete(&self) -> bool {
        self.exhausted && self.interruption.is_none() && self.failed == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sync of {}: {} fetched, {} created, {} updated, {} failed",
            self.mode, self.mailbox, self.fetched, self.created, self.updated, self.failed
        )?;

        if let Some(interruption) = &self.interruption {
            write!(f, " ({})", interruption)?;
        }

        Ok(())
    }
}

/// Cooperative cancellation flag, checked between page fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Represents the progress of a synchronization, reported to the
/// `on_progress` callback.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SyncProgressEvent {
    CheckMailbox(String),
    ListPage(usize),
    ApplyItems(usize),
    IndexMessages(usize),
    AdvanceWatermark(String),
}

impl fmt::Display for SyncProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckMailbox(mailbox) => write!(f, "Checking mailbox {mailbox}"),
            Self::ListPage(page) => write!(f, "Listing page {page}"),
            Self::ApplyItems(count) => write!(f, "Applying {count} item(s)"),
            Self::IndexMessages(count) => write!(f, "Indexing {count} message(s)"),
            Self::AdvanceWatermark(mailbox) => write!(f, "Advancing watermark of {mailbox}"),
        }
    }
}
