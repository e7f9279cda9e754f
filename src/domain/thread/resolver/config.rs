use chrono::Duration;
use serde::Deserialize;

pub const DEFAULT_SUBJECT_WINDOW_HOURS: i64 = 72;
pub const DEFAULT_MIN_SUBJECT_LEN: usize = 5;
pub const DEFAULT_MIN_PARTICIPANT_OVERLAP: usize = 2;
pub const DEFAULT_RECENT_MESSAGES: usize = 5;

/// Represents the configuration of the subject and participants
/// heuristic.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
pub struct ResolverConfig {
    /// Represents the rolling window, in hours, around the candidate
    /// timestamp in which thread activity is considered.
    #[serde(default)]
    pub subject_window_hours: Option<i64>,
    /// Represents the length under which a normalized subject is
    /// considered too generic to be matched.
    #[serde(default)]
    pub min_subject_len: Option<usize>,
    /// Represents the minimum number of shared participant
    /// addresses, sender included.
    #[serde(default)]
    pub min_participant_overlap: Option<usize>,
    /// Represents the number of most recent thread messages the
    /// participants are compared against.
    #[serde(default)]
    pub recent_messages: Option<usize>,
}

impl ResolverConfig {
    pub fn subject_window(&self) -> Duration {
        Duration::hours(
            self.subject_window_hours
                .unwrap_or(DEFAULT_SUBJECT_WINDOW_HOURS),
        )
    }

    pub fn min_subject_len(&self) -> usize {
        self.min_subject_len.unwrap_or(DEFAULT_MIN_SUBJECT_LEN)
    }

    pub fn min_participant_overlap(&self) -> usize {
        self.min_participant_overlap
            .unwrap_or(DEFAULT_MIN_PARTICIPANT_OVERLAP)
            .max(1)
    }

    pub fn recent_messages(&self) -> usize {
        self.recent_messages.unwrap_or(DEFAULT_RECENT_MESSAGES).max(1)
    }
}
