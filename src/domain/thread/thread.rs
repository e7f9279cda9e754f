use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, result, str::FromStr};
use thiserror::Error;

use crate::{Category, Direction};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse thread status {0}")]
    ParseThreadStatusError(String),
}

/// Represents the follow-up status of a thread.
#[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq, Serialize)]
pub enum ThreadStatus {
    #[default]
    AwaitingReply,
    Replied,
    Resolved,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingReply => "awaiting_reply",
            Self::Replied => "replied",
            Self::Resolved => "resolved",
            Self::Archived => "archived",
        }
    }

    /// Returns true for statuses only an explicit action can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Archived)
    }

    /// Computes the status after appending a message with the given
    /// direction.
    pub fn on_append(self, direction: Direction) -> Self {
        match (self, direction) {
            (status, _) if status.is_terminal() => status,
            (_, Direction::Outgoing) => Self::Replied,
            (Self::Replied, Direction::Incoming) => Self::AwaitingReply,
            (status, Direction::Incoming) => status,
        }
    }
}

impl FromStr for ThreadStatus {
    type Err = Error;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s {
            "awaiting_reply" => Ok(Self::AwaitingReply),
            "replied" => Ok(Self::Replied),
            "resolved" => Ok(Self::Resolved),
            "archived" => Ok(Self::Archived),
            unknown => Err(Error::ParseThreadStatusError(unknown.to_owned())),
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a conversation thread.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Thread {
    pub id: String,
    /// Represents the subject of the first message, as displayed.
    pub subject: String,
    /// Represents the subject used by the heuristic matching.
    pub normalized_subject: String,
    pub conversation_id: Option<String>,
    pub correlation_id: Option<String>,
    pub category: Category,
    /// Represents the number of messages owning the thread.
    pub message_count: usize,
    pub first_message_id: Option<String>,
    pub last_message_id: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub status: ThreadStatus,
    pub created_at: Option<DateTime<Utc>>,
}
