//! Message normalizer module.
//!
//! This module converts raw provider payloads into canonical
//! [`Message`]s: addresses are case-folded, threading headers are
//! cleaned up, subjects are decoded and bodies are rendered as text.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{trace, warn};
use std::result;
use thiserror::Error;
use uuid::Uuid;

use crate::{Attachment, Direction, MailboxConfig, Message, RawBody, RawMessage, RawRecipient};

pub const DEFAULT_CORRELATION_HEADER: &str = "X-Correlation-Id";
pub const DEFAULT_TOKEN_PREFIX: &str = "TAX_";
pub const PREVIEW_MAX_CHARS: usize = 255;
const HTML_TEXT_WIDTH: usize = 120;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot normalize message: missing remote id")]
    MissingRemoteIdError,
}

pub type Result<T> = result::Result<T, Error>;

/// Cleans up a message identifier: surrounding whitespaces and angle
/// brackets are removed.
pub fn clean_message_id(id: &str) -> Option<String> {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>').trim();

    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}

/// Builds the loose key of a message identifier, used to match
/// headers written by clients that do not preserve case or
/// brackets.
pub fn message_key(id: &str) -> Option<String> {
    clean_message_id(id).map(|id| id.to_lowercase())
}

fn parse_date(date: &str) -> Option<DateTime<Utc>> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(date)
        .or_else(|_| DateTime::parse_from_rfc2822(date))
        .map(|date| date.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|date| Utc.from_utc_datetime(&date))
        })
        .map_err(|err| warn!("invalid date {}, skipping it: {}", date, err))
        .ok()
}

/// Parses an address, possibly written with a display name, into a
/// lower-cased address and an optional display name.
fn parse_address(addr: &str) -> Option<(String, Option<String>)> {
    let parsed = mailparse::addrparse(addr)
        .ok()
        .and_then(|addrs| {
            addrs.iter().find_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => {
                    Some((info.addr.clone(), info.display_name.clone()))
                }
                mailparse::MailAddr::Group(group) => group
                    .addrs
                    .first()
                    .map(|info| (info.addr.clone(), info.display_name.clone())),
            })
        })
        .unwrap_or_else(|| (addr.to_owned(), None));

    let addr = parsed.0.trim().to_lowercase();
    if addr.is_empty() {
        None
    } else {
        Some((addr, parsed.1))
    }
}

fn parse_address_list(addrs: &str) -> Vec<String> {
    match mailparse::addrparse(addrs) {
        Ok(addrs) => addrs
            .iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
                mailparse::MailAddr::Group(group) => {
                    group.addrs.iter().map(|info| info.addr.clone()).collect()
                }
            })
            .map(|addr| addr.trim().to_lowercase())
            .filter(|addr| !addr.is_empty())
            .collect(),
        Err(err) => {
            warn!("cannot parse address list {}, skipping it: {}", addrs, err);
            Vec::new()
        }
    }
}

fn recipients(list: &[RawRecipient]) -> Vec<String> {
    list.iter()
        .filter_map(|recipient| recipient.email_address.address.as_deref())
        .filter_map(parse_address)
        .map(|(addr, _)| addr)
        .collect()
}

fn decode_subject(subject: &str) -> String {
    if !subject.contains("=?") {
        return subject.trim().to_owned();
    }

    match rfc2047_decoder::decode(subject.as_bytes()) {
        Ok(subject) => subject.trim().to_owned(),
        Err(err) => {
            warn!("cannot decode subject {}, keeping it raw: {}", subject, err);
            subject.trim().to_owned()
        }
    }
}

/// Renders an HTML body as plain text. Falls back to the raw markup
/// when the document cannot be parsed.
pub fn html_to_text(html: &str) -> String {
    let text = match html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH) {
        Ok(text) => text,
        Err(err) => {
            warn!("cannot render html body, keeping it raw: {}", err);
            html.to_owned()
        }
    };

    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() && lines.last().map_or(true, String::is_empty) {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_owned()
}

/// Splits a raw body into its text rendition and, for HTML bodies,
/// the original HTML.
pub fn body_parts(body: &RawBody) -> (Option<String>, Option<String>) {
    if body.content_type.eq_ignore_ascii_case("html") {
        (Some(html_to_text(&body.content)), Some(body.content.clone()))
    } else {
        (Some(body.content.trim().to_owned()), None)
    }
}

/// Builds a single-line preview of at most [`PREVIEW_MAX_CHARS`]
/// characters.
pub fn preview(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(PREVIEW_MAX_CHARS)
        .collect()
}

/// Generates the correlation token of an outgoing message: the prefix,
/// the unix time of the send, up to 8 alphanumerics of the sender key
/// and a random suffix keeping tokens sent within the same second
/// apart.
pub fn new_correlation_token(prefix: &str, sender: &str, at: DateTime<Utc>) -> String {
    let sender: String = sender
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    let suffix: String = Uuid::new_v4().to_simple().to_string().chars().take(8).collect();

    if sender.is_empty() {
        format!("{}{}_{}", prefix, at.timestamp(), suffix)
    } else {
        format!("{}{}_{}_{}", prefix, at.timestamp(), sender, suffix)
    }
}

/// Extracts the first application token starting with the given
/// prefix. Tokens are made of ASCII alphanumerics, `_` and `-`.
fn find_token(haystack: &str, prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }

    haystack.match_indices(prefix).find_map(|(start, _)| {
        let rest = &haystack[start + prefix.len()..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());

        if len == 0 {
            None
        } else {
            Some(format!("{}{}", prefix, &rest[..len]))
        }
    })
}

/// Converts raw provider payloads into canonical messages for one
/// mailbox.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mailbox: String,
    owner: String,
    correlation_header: String,
    reference_prefix: Option<String>,
}

impl Normalizer {
    pub fn new(mailbox: &MailboxConfig) -> Self {
        Self {
            mailbox: mailbox.id.clone(),
            owner: mailbox.address.trim().to_lowercase(),
            correlation_header: DEFAULT_CORRELATION_HEADER.to_owned(),
            reference_prefix: None,
        }
    }

    pub fn correlation_header<H: ToString>(mut self, header: H) -> Self {
        self.correlation_header = header.to_string();
        self
    }

    pub fn reference_prefix(mut self, prefix: Option<String>) -> Self {
        self.reference_prefix = prefix.filter(|prefix| !prefix.is_empty());
        self
    }

    pub fn normalize(&self, raw: &RawMessage) -> Result<Message> {
        let remote_id = raw.id.trim();
        if remote_id.is_empty() {
            return Err(Error::MissingRemoteIdError);
        }

        trace!("normalizing raw message: {:#?}", raw);

        let (from, from_name) = raw
            .from
            .as_ref()
            .and_then(|from| {
                let addr = from.email_address.address.as_deref()?;
                let (addr, name) = parse_address(addr)?;
                Some((addr, from.email_address.name.clone().or(name)))
            })
            .or_else(|| raw.header("From").and_then(parse_address))
            .unwrap_or_default();

        let mut to = recipients(&raw.to_recipients);
        if to.is_empty() {
            to = raw.header("To").map(parse_address_list).unwrap_or_default();
        }
        let mut cc = recipients(&raw.cc_recipients);
        if cc.is_empty() {
            cc = raw.header("Cc").map(parse_address_list).unwrap_or_default();
        }
        let bcc = recipients(&raw.bcc_recipients);

        let immutable_id = raw
            .internet_message_id
            .as_deref()
            .or_else(|| raw.header("Message-ID"))
            .and_then(clean_message_id);

        let in_reply_to = raw.header("In-Reply-To").and_then(clean_message_id);

        let references: Vec<String> = raw
            .header("References")
            .map(|refs| refs.split_whitespace().filter_map(clean_message_id).collect())
            .unwrap_or_default();

        let direction = if !self.owner.is_empty() && from == self.owner {
            Direction::Outgoing
        } else {
            Direction::Incoming
        };

        let header_token = raw
            .header(&self.correlation_header)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);

        let reference_token = self.reference_prefix.as_deref().and_then(|prefix| {
            raw.header("References")
                .into_iter()
                .chain(raw.header("In-Reply-To"))
                .find_map(|refs| find_token(refs, prefix))
        });

        let (correlation_id, correlation_ref) = match (direction, header_token) {
            (Direction::Outgoing, Some(token)) => (Some(token), None),
            (_, token) => (None, token.or(reference_token)),
        };

        let (body_text, body_html) = raw.body.as_ref().map(body_parts).unwrap_or_default();

        let preview = raw
            .body_preview
            .as_deref()
            .filter(|preview| !preview.trim().is_empty())
            .map(preview)
            .or_else(|| body_text.as_deref().map(preview))
            .unwrap_or_default();

        let attachments = raw
            .attachments
            .iter()
            .map(|attachment| Attachment {
                remote_id: attachment.id.clone(),
                file_name: attachment.name.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.size,
                is_inline: attachment.is_inline,
                ..Attachment::default()
            })
            .collect::<Vec<_>>();

        Ok(Message {
            mailbox: self.mailbox.clone(),
            remote_id: remote_id.to_owned(),
            immutable_id,
            correlation_id,
            correlation_ref,
            direction,
            subject: raw.subject.as_deref().map(decode_subject).unwrap_or_default(),
            from,
            from_name,
            to,
            cc,
            bcc,
            in_reply_to,
            references,
            conversation_id: raw
                .conversation_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned),
            sent_at: raw.sent_date_time.as_deref().and_then(parse_date),
            received_at: raw.received_date_time.as_deref().and_then(parse_date),
            has_attachments: raw.has_attachments || !attachments.is_empty(),
            is_read: raw.is_read,
            body_text,
            body_html,
            preview,
            attachments,
            ..Message::default()
        })
    }
}
