use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

use crate::Attachment;

/// Represents the direction of a message, seen from the mailbox
/// owner.
#[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq, Serialize)]
pub enum Direction {
    #[default]
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl From<&str> for Direction {
    fn from(s: &str) -> Self {
        match s {
            "outgoing" | "sent" => Self::Outgoing,
            _ => Self::Incoming,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents the canonical message, as produced by the normalizer
/// and persisted by the store.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Message {
    /// Represents the internal identifier.
    pub id: String,
    /// Represents the mailbox the message was synchronized from.
    pub mailbox: String,
    /// Represents the provider identifier. It can change when the
    /// message moves between folders.
    pub remote_id: String,
    /// Represents the provider identifier stable for the whole
    /// message lifetime.
    pub immutable_id: Option<String>,
    /// Represents the application token owned by this message. Only
    /// outgoing messages own a token.
    pub correlation_id: Option<String>,
    /// Represents an application token referenced by this message
    /// without owning it (replies quoting the token).
    pub correlation_ref: Option<String>,
    /// Represents the owning thread identifier.
    pub thread_id: String,
    pub direction: Direction,
    pub subject: String,
    /// Represents the lower-cased sender address.
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Represents the cleaned In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Represents the cleaned References header, oldest first.
    pub references: Vec<String>,
    /// Represents the provider conversation identifier.
    pub conversation_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub has_attachments: bool,
    pub is_read: bool,
    /// Represents the local follow-up flag. Synchronization never
    /// changes it.
    pub is_flagged: bool,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub preview: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Returns the sender and all the recipients, case-folded.
    pub fn participants(&self) -> BTreeSet<String> {
        participants(&self.from, &self.to, &self.cc, &self.bcc)
    }

    /// Returns the best known timestamp of the message.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.received_at.or(self.sent_at)
    }

    /// Returns the correlation token carried by the message, owned
    /// or referenced.
    pub fn correlation_token(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .or(self.correlation_ref.as_deref())
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}

/// Builds a participant set out of a sender and recipients lists.
pub fn participants<S: AsRef<str>>(from: &str, to: &[S], cc: &[S], bcc: &[S]) -> BTreeSet<String> {
    let recipients = to.iter().chain(cc).chain(bcc).map(<S as AsRef<str>>::as_ref);

    std::iter::once(from)
        .chain(recipients)
        .map(|addr| addr.trim().to_lowercase())
        .filter(|addr| !addr.is_empty())
        .collect()
}
