use std::{result, time::Duration};
use thiserror::Error;

use crate::{AttachmentContent, RawAttachment, RawMessage};

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum Error {
    #[error("request timed out: {0}")]
    TimeoutError(String),
    #[error("transient provider failure: {0}")]
    TransientError(String),
    #[error("cannot find remote item {0}")]
    NotFoundError(String),
    #[error("rate limited by provider")]
    RateLimitedError(Option<Duration>),
    #[error("credentials rejected for mailbox {0}")]
    UnauthorizedError(String),
    #[error("cannot find mailbox {0}")]
    MailboxNotFoundError(String),
    #[error("invalid provider response: {0}")]
    InvalidResponseError(String),
}

impl Error {
    /// Returns true for errors worth retrying with a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimeoutError(_) | Self::TransientError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundError(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitedError(_))
    }

    /// Returns true for errors invalidating a whole batch rather than
    /// a single item.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::UnauthorizedError(_) | Self::MailboxNotFoundError(_))
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Represents a request for one page of messages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PageRequest {
    pub mailbox: String,
    /// Represents the opaque continuation returned with the previous
    /// page, if any.
    pub cursor: Option<String>,
    pub page_size: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Page {
    pub items: Vec<RawMessage>,
    /// Represents the continuation of the next page. None when the
    /// listing is exhausted.
    pub next: Option<String>,
}

/// Represents a message found by its immutable id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RemoteMatch {
    pub remote_id: String,
    pub immutable_id: String,
    /// Represents the folder currently holding the message.
    pub container: String,
}

/// Remote mailbox provider. Every call carries its own timeout.
pub trait Provider: Send + Sync {
    /// Checks that the mailbox exists and that the credentials are
    /// accepted.
    fn check_mailbox(&self, mailbox: &str, timeout: Duration) -> Result<()>;

    fn list_messages(&self, req: &PageRequest) -> Result<Page>;

    /// Gets a message, body included.
    fn get_message(&self, mailbox: &str, remote_id: &str, timeout: Duration) -> Result<RawMessage>;

    /// Searches all the folders of the mailbox for messages with
    /// exactly the given immutable id.
    fn find_by_immutable_id(
        &self,
        mailbox: &str,
        immutable_id: &str,
        timeout: Duration,
    ) -> Result<Vec<RemoteMatch>>;

    fn list_attachments(
        &self,
        mailbox: &str,
        remote_id: &str,
        timeout: Duration,
    ) -> Result<Vec<RawAttachment>>;

    fn get_attachment(
        &self,
        mailbox: &str,
        remote_id: &str,
        attachment_id: &str,
        timeout: Duration,
    ) -> Result<AttachmentContent>;
}
