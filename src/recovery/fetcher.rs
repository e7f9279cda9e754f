use log::{debug, warn};

use crate::{
    body_parts, provider, Attachment, AttachmentContent, Message, RawAttachment, RawMessage,
};

use super::{Error, IdentityRecovery, Reason, Result};

/// Represents a message body, either freshly fetched or taken from
/// the store.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Body {
    pub text: Option<String>,
    pub html: Option<String>,
    pub from_cache: bool,
}

/// Fetches message and attachment contents, recovering stale remote
/// identifiers at most once per request.
#[derive(Clone)]
pub struct ContentFetcher {
    recovery: IdentityRecovery,
}

impl ContentFetcher {
    pub fn new(recovery: IdentityRecovery) -> Self {
        Self { recovery }
    }

    fn get_message(&self, mailbox: &str, remote_id: &str) -> provider::Result<RawMessage> {
        let timeout = self.recovery.timeout();
        self.recovery.retry().run("get message", || {
            self.recovery.provider().get_message(mailbox, remote_id, timeout)
        })
    }

    fn get_attachment(
        &self,
        mailbox: &str,
        remote_id: &str,
        attachment_id: &str,
    ) -> provider::Result<AttachmentContent> {
        let timeout = self.recovery.timeout();
        self.recovery.retry().run("get attachment", || {
            self.recovery
                .provider()
                .get_attachment(mailbox, remote_id, attachment_id, timeout)
        })
    }

    fn list_attachments(&self, mailbox: &str, remote_id: &str) -> Result<Vec<RawAttachment>> {
        let timeout = self.recovery.timeout();
        self.recovery
            .retry()
            .run("list attachments", || {
                self.recovery
                    .provider()
                    .list_attachments(mailbox, remote_id, timeout)
            })
            .map_err(|err| Error::ProviderError(err, remote_id.to_owned()))
    }

    /// Fetches the full message. A not found error triggers one
    /// recovery followed by one retry with the corrected remote id.
    pub fn fetch_message(&self, message: &Message) -> Result<RawMessage> {
        match self.get_message(&message.mailbox, &message.remote_id) {
            Ok(raw) => Ok(raw),
            Err(err) if err.is_not_found() => {
                debug!("message {} not found, recovering it", message.remote_id);
                let remote_id = self.recovery.recover(message)?;
                self.get_message(&message.mailbox, &remote_id)
                    .map_err(|err| Error::ProviderError(err, remote_id))
            }
            Err(err) => Err(Error::ProviderError(err, message.remote_id.clone())),
        }
    }

    /// Fetches the body of a stored message, falling back to the
    /// stored copy when the message cannot be recovered.
    pub fn fetch_body_or_cached(&self, message: &Message) -> Result<Body> {
        match self.fetch_message(message) {
            Ok(raw) => {
                let (text, html) = raw.body.as_ref().map(body_parts).unwrap_or_default();
                Ok(Body {
                    text,
                    html,
                    from_cache: false,
                })
            }
            Err(err) if err.is_not_recoverable() => {
                warn!("{}, using cached body of message {}", err, message.id);
                Ok(Body {
                    text: message.body_text.clone(),
                    html: message.body_html.clone(),
                    from_cache: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches the content of an attachment. When the stored ids are
    /// stale, the message is recovered, then the attachment is looked
    /// up by its previous id, by its file name, or taken as the only
    /// attachment of the message. The corrected attachment id is
    /// persisted.
    pub fn fetch_attachment(
        &self,
        message: &Message,
        attachment: &Attachment,
    ) -> Result<AttachmentContent> {
        let mailbox = message.mailbox.as_str();

        match self.get_attachment(mailbox, &message.remote_id, &attachment.remote_id) {
            Ok(content) => return Ok(content),
            Err(err) if err.is_not_found() => {
                debug!(
                    "attachment {} of message {} not found, recovering it",
                    attachment.remote_id, message.remote_id
                );
            }
            Err(err) => return Err(Error::ProviderError(err, attachment.remote_id.clone())),
        }

        let remote_id = self.recovery.recover(message)?;

        if remote_id != message.remote_id {
            match self.get_attachment(mailbox, &remote_id, &attachment.remote_id) {
                Ok(content) => return Ok(content),
                Err(err) if err.is_not_found() => (),
                Err(err) => return Err(Error::ProviderError(err, attachment.remote_id.clone())),
            }
        }

        let remote_attachments = self.list_attachments(mailbox, &remote_id)?;
        let found = match_attachment(attachment, &remote_attachments).ok_or_else(|| {
            Error::NotRecoverableError(attachment.file_name.clone(), Reason::AttachmentNotFound)
        })?;

        if !attachment.id.is_empty() && found.id != attachment.remote_id {
            self.recovery
                .store()
                .correct_attachment_remote_id(&attachment.id, &found.id)?;
            debug!(
                "attachment {} recovered: remote id {} -> {}",
                attachment.id, attachment.remote_id, found.id
            );
        }

        self.get_attachment(mailbox, &remote_id, &found.id)
            .map_err(|err| Error::ProviderError(err, found.id.clone()))
    }
}

/// Matches a stored attachment against the remote attachments of its
/// message: by file name (size breaking ties), otherwise the single
/// remote attachment.
fn match_attachment<'a>(
    attachment: &Attachment,
    remote: &'a [RawAttachment],
) -> Option<&'a RawAttachment> {
    let by_name: Vec<&RawAttachment> = remote
        .iter()
        .filter(|candidate| attachment.matches_file_name(&candidate.name))
        .collect();

    match by_name.as_slice() {
        [found] => return Some(found),
        [] => (),
        _ => {
            let by_size: Vec<&&RawAttachment> = by_name
                .iter()
                .filter(|candidate| candidate.size == attachment.size)
                .collect();
            if let [found] = by_size.as_slice() {
                return Some(**found);
            }
            return None;
        }
    }

    match remote {
        [single] => Some(single),
        _ => None,
    }
}
