//! In-memory provider module.
//!
//! This module contains a scriptable [`Provider`] keeping mailboxes in
//! memory. Messages can be moved between folders (which changes their
//! remote id), attachments can be re-keyed and failures can be
//! injected per operation. It backs the tests and can serve as a
//! reference for real provider implementations.

use log::trace;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{clean_message_id, AttachmentContent, RawAttachment, RawMessage};

use super::{Error, Page, PageRequest, Provider, RemoteMatch, Result};

const CURSOR_PREFIX: &str = "offset:";

/// Represents the provider operations failures can be injected into.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Op {
    CheckMailbox,
    ListMessages,
    GetMessage,
    FindByImmutableId,
    ListAttachments,
    GetAttachment,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    container: String,
    raw: RawMessage,
    contents: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    mailboxes: HashMap<String, Vec<StoredMessage>>,
    denied: HashSet<String>,
    outcomes: HashMap<Op, VecDeque<Option<Error>>>,
    calls: HashMap<Op, usize>,
    cursors: Vec<Option<String>>,
    envelope_only: bool,
    next_id: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn enter(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;

        match self.outcomes.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => {
                trace!("injecting {:?} failure: {}", op, err);
                Err(err)
            }
            _ => Ok(()),
        }
    }

    fn mailbox(&self, mailbox: &str) -> Result<&Vec<StoredMessage>> {
        self.mailboxes
            .get(mailbox)
            .ok_or_else(|| Error::MailboxNotFoundError(mailbox.to_owned()))
    }

    fn message(&self, mailbox: &str, remote_id: &str) -> Result<&StoredMessage> {
        self.mailbox(mailbox)?
            .iter()
            .find(|message| message.raw.id == remote_id)
            .ok_or_else(|| Error::NotFoundError(remote_id.to_owned()))
    }

    fn message_mut(&mut self, mailbox: &str, remote_id: &str) -> Option<&mut StoredMessage> {
        self.mailboxes
            .get_mut(mailbox)?
            .iter_mut()
            .find(|message| message.raw.id == remote_id)
    }
}

/// Scriptable in-memory provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty mailbox.
    pub fn add_mailbox(&self, mailbox: &str) {
        self.state().mailboxes.entry(mailbox.to_owned()).or_default();
    }

    /// Adds a message to a folder of a mailbox, creating the mailbox
    /// if needed. A remote id is allocated when the message has none.
    /// Returns the remote id.
    pub fn add_message(&self, mailbox: &str, container: &str, mut raw: RawMessage) -> String {
        let mut state = self.state();

        if raw.id.is_empty() {
            raw.id = state.next_id("msg");
        }

        let id = raw.id.clone();
        state
            .mailboxes
            .entry(mailbox.to_owned())
            .or_default()
            .push(StoredMessage {
                container: container.to_owned(),
                raw,
                contents: HashMap::new(),
            });

        id
    }

    /// Adds an attachment to a message. An attachment id is allocated
    /// when the attachment has none. Returns the attachment id.
    pub fn add_attachment(
        &self,
        mailbox: &str,
        remote_id: &str,
        mut attachment: RawAttachment,
        bytes: Vec<u8>,
    ) -> Option<String> {
        let mut state = self.state();

        if attachment.id.is_empty() {
            attachment.id = state.next_id("att");
        }

        let message = state.message_mut(mailbox, remote_id)?;
        let id = attachment.id.clone();
        attachment.size = bytes.len() as u64;
        message.contents.insert(id.clone(), bytes);
        message.raw.attachments.push(attachment);
        message.raw.has_attachments = true;

        Some(id)
    }

    /// Moves a message to another folder. Like real providers, the
    /// message gets a new remote id. Returns the new remote id.
    pub fn move_message(&self, mailbox: &str, remote_id: &str, container: &str) -> Option<String> {
        let mut state = self.state();
        let new_id = state.next_id("msg");

        let message = state.message_mut(mailbox, remote_id)?;
        message.container = container.to_owned();
        message.raw.id = new_id.clone();

        Some(new_id)
    }

    /// Allocates new ids to all the attachments of a message, keeping
    /// their content and file names.
    pub fn rekey_attachments(&self, mailbox: &str, remote_id: &str) -> Vec<String> {
        let mut state = self.state();
        let count = match state.message_mut(mailbox, remote_id) {
            Some(message) => message.raw.attachments.len(),
            None => return Vec::new(),
        };
        let ids: Vec<String> = (0..count).map(|_| state.next_id("att")).collect();

        if let Some(message) = state.message_mut(mailbox, remote_id) {
            let mut contents = HashMap::new();
            for (attachment, id) in message.raw.attachments.iter_mut().zip(&ids) {
                if let Some(bytes) = message.contents.remove(&attachment.id) {
                    contents.insert(id.clone(), bytes);
                }
                attachment.id = id.clone();
            }
            message.contents = contents;
        }

        ids
    }

    pub fn remove_message(&self, mailbox: &str, remote_id: &str) -> bool {
        let mut state = self.state();
        match state.mailboxes.get_mut(mailbox) {
            Some(messages) => {
                let len = messages.len();
                messages.retain(|message| message.raw.id != remote_id);
                messages.len() != len
            }
            None => false,
        }
    }

    /// Makes the mailbox reject the credentials.
    pub fn deny(&self, mailbox: &str) {
        self.state().denied.insert(mailbox.to_owned());
    }

    /// Makes listings return envelopes only, without bodies.
    pub fn envelope_only(&self, envelope_only: bool) {
        self.state().envelope_only = envelope_only;
    }

    /// Queues a failure for the next call of the given operation.
    pub fn fail_next(&self, op: Op, err: Error) {
        self.state().outcomes.entry(op).or_default().push_back(Some(err));
    }

    /// Queues a success for the next call of the given operation,
    /// useful to script a failure after some successful calls.
    pub fn pass_next(&self, op: Op) {
        self.state().outcomes.entry(op).or_default().push_back(None);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }

    /// Returns the cursors of all the listing calls, in call order.
    pub fn visited_cursors(&self) -> Vec<Option<String>> {
        self.state().cursors.clone()
    }

    pub fn remote_ids(&self, mailbox: &str) -> Vec<String> {
        self.state()
            .mailboxes
            .get(mailbox)
            .map(|messages| messages.iter().map(|message| message.raw.id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Provider for MemoryProvider {
    fn check_mailbox(&self, mailbox: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        state.enter(Op::CheckMailbox)?;

        if state.denied.contains(mailbox) {
            return Err(Error::UnauthorizedError(mailbox.to_owned()));
        }

        state.mailbox(mailbox).map(|_| ())
    }

    fn list_messages(&self, req: &PageRequest) -> Result<Page> {
        let mut state = self.state();
        state.cursors.push(req.cursor.clone());
        state.enter(Op::ListMessages)?;

        let offset = match &req.cursor {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix(CURSOR_PREFIX)
                .and_then(|offset| offset.parse::<usize>().ok())
                .ok_or_else(|| Error::InvalidResponseError(format!("invalid cursor {}", cursor)))?,
        };

        let envelope_only = state.envelope_only;
        let messages = state.mailbox(&req.mailbox)?;
        let end = (offset + req.page_size.max(1)).min(messages.len());

        let items = messages
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|message| {
                let mut raw = message.raw.clone();
                if envelope_only {
                    raw.body = None;
                }
                raw
            })
            .collect();

        let next = if end < messages.len() {
            Some(format!("{}{}", CURSOR_PREFIX, end))
        } else {
            None
        };

        Ok(Page { items, next })
    }

    fn get_message(&self, mailbox: &str, remote_id: &str, _timeout: Duration) -> Result<RawMessage> {
        let mut state = self.state();
        state.enter(Op::GetMessage)?;
        Ok(state.message(mailbox, remote_id)?.raw.clone())
    }

    fn find_by_immutable_id(
        &self,
        mailbox: &str,
        immutable_id: &str,
        _timeout: Duration,
    ) -> Result<Vec<RemoteMatch>> {
        let mut state = self.state();
        state.enter(Op::FindByImmutableId)?;

        let wanted = clean_message_id(immutable_id);
        let matches = state
            .mailbox(mailbox)?
            .iter()
            .filter_map(|message| {
                let id = message
                    .raw
                    .internet_message_id
                    .as_deref()
                    .and_then(clean_message_id)?;
                if Some(&id) == wanted.as_ref() {
                    Some(RemoteMatch {
                        remote_id: message.raw.id.clone(),
                        immutable_id: id,
                        container: message.container.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();

        Ok(matches)
    }

    fn list_attachments(
        &self,
        mailbox: &str,
        remote_id: &str,
        _timeout: Duration,
    ) -> Result<Vec<RawAttachment>> {
        let mut state = self.state();
        state.enter(Op::ListAttachments)?;
        Ok(state.message(mailbox, remote_id)?.raw.attachments.clone())
    }

    fn get_attachment(
        &self,
        mailbox: &str,
        remote_id: &str,
        attachment_id: &str,
        _timeout: Duration,
    ) -> Result<AttachmentContent> {
        let mut state = self.state();
        state.enter(Op::GetAttachment)?;

        let message = state.message(mailbox, remote_id)?;
        let attachment = message
            .raw
            .attachments
            .iter()
            .find(|attachment| attachment.id == attachment_id)
            .ok_or_else(|| Error::NotFoundError(attachment_id.to_owned()))?;
        let bytes = message
            .contents
            .get(attachment_id)
            .cloned()
            .unwrap_or_default();

        Ok(AttachmentContent {
            remote_id: attachment.id.clone(),
            file_name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn request(cursor: Option<String>) -> PageRequest {
        PageRequest {
            mailbox: "desk".into(),
            cursor,
            page_size: 2,
            timeout: TIMEOUT,
        }
    }

    #[test]
    fn pages_follow_cursors() {
        let provider = MemoryProvider::new();
        for _ in 0..3 {
            provider.add_message("desk", "inbox", RawMessage::default());
        }

        let first = provider.list_messages(&request(None)).unwrap();
        assert_eq!(first.items.len(), 2);

        let second = provider.list_messages(&request(first.next.clone())).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next, None);

        assert_eq!(provider.visited_cursors(), vec![None, first.next]);
    }

    #[test]
    fn moved_message_is_found_by_immutable_id() {
        let provider = MemoryProvider::new();
        let id = provider.add_message(
            "desk",
            "inbox",
            RawMessage {
                internet_message_id: Some("<root@x>".into()),
                ..RawMessage::default()
            },
        );

        let new_id = provider.move_message("desk", &id, "archive").unwrap();
        assert_ne!(id, new_id);
        assert!(provider
            .get_message("desk", &id, TIMEOUT)
            .unwrap_err()
            .is_not_found());

        let matches = provider.find_by_immutable_id("desk", "root@x", TIMEOUT).unwrap();
        assert_eq!(
            matches,
            vec![RemoteMatch {
                remote_id: new_id,
                immutable_id: "root@x".into(),
                container: "archive".into(),
            }]
        );
    }

    #[test]
    fn scripted_failures() {
        let provider = MemoryProvider::new();
        provider.add_mailbox("desk");
        provider.pass_next(Op::CheckMailbox);
        provider.fail_next(Op::CheckMailbox, Error::TransientError("503".into()));

        assert!(provider.check_mailbox("desk", TIMEOUT).is_ok());
        assert!(provider.check_mailbox("desk", TIMEOUT).unwrap_err().is_retryable());
        assert!(provider.check_mailbox("desk", TIMEOUT).is_ok());
        assert_eq!(provider.calls(Op::CheckMailbox), 3);

        assert!(provider.check_mailbox("nope", TIMEOUT).unwrap_err().is_precondition());
        provider.deny("desk");
        assert!(provider.check_mailbox("desk", TIMEOUT).unwrap_err().is_precondition());
    }

    #[test]
    fn rekeyed_attachments_keep_content() {
        let provider = MemoryProvider::new();
        let id = provider.add_message("desk", "inbox", RawMessage::default());
        let att = provider
            .add_attachment(
                "desk",
                &id,
                RawAttachment {
                    name: "return.pdf".into(),
                    ..RawAttachment::default()
                },
                b"%PDF".to_vec(),
            )
            .unwrap();

        let new_ids = provider.rekey_attachments("desk", &id);
        assert_eq!(new_ids.len(), 1);
        assert_ne!(new_ids[0], att);

        let content = provider
            .get_attachment("desk", &id, &new_ids[0], TIMEOUT)
            .unwrap();
        assert_eq!(content.bytes, b"%PDF");
        assert_eq!(content.file_name, "return.pdf");
    }
}
