use chrono::{DateTime, Duration, Utc};

/// Represents the time of the last complete synchronization of a
/// mailbox.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyncWatermark {
    pub mailbox: String,
    pub synced_at: DateTime<Utc>,
}

impl SyncWatermark {
    /// Returns true if the last complete synchronization is older
    /// than the given interval.
    pub fn is_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        now - self.synced_at >= interval
    }
}
