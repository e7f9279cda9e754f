//! Raw message module.
//!
//! This module contains the representation of a message as returned
//! by a provider, before normalization. Only the consumed fields are
//! modelled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecipient {
    pub email_address: RawAddress,
}

impl RawRecipient {
    pub fn new<A: ToString>(address: A) -> Self {
        Self {
            email_address: RawAddress {
                name: None,
                address: Some(address.to_string()),
            },
        }
    }

    pub fn with_name<N: ToString, A: ToString>(name: N, address: A) -> Self {
        Self {
            email_address: RawAddress {
                name: Some(name.to_string()),
                address: Some(address.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBody {
    /// Either `text` or `html`, case insensitive.
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttachment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_inline: bool,
}

/// Represents a message as delivered by a provider.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub internet_message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<RawBody>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub from: Option<RawRecipient>,
    #[serde(default)]
    pub to_recipients: Vec<RawRecipient>,
    #[serde(default)]
    pub cc_recipients: Vec<RawRecipient>,
    #[serde(default)]
    pub bcc_recipients: Vec<RawRecipient>,
    #[serde(default)]
    pub sent_date_time: Option<String>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default, rename = "internetMessageHeaders")]
    pub headers: Vec<RawHeader>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub is_read: bool,
}

impl RawMessage {
    /// Returns the first header value matching the given name, case
    /// insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Returns true if the payload contains the body, which is not
    /// the case for envelope-only listings.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_provider_payload() {
        let raw: RawMessage = serde_json::from_str(
            r#"{
                "id": "AAMk1",
                "internetMessageId": "<abc@example.com>",
                "subject": "Hello",
                "from": { "emailAddress": { "name": "Alice", "address": "alice@example.com" } },
                "toRecipients": [{ "emailAddress": { "address": "bob@example.com" } }],
                "internetMessageHeaders": [{ "name": "In-Reply-To", "value": "<x@y>" }],
                "body": { "contentType": "html", "content": "<p>Hi</p>" }
            }"#,
        )
        .unwrap();

        assert_eq!(raw.id, "AAMk1");
        assert_eq!(raw.header("in-reply-to"), Some("<x@y>"));
        assert_eq!(raw.to_recipients, vec![RawRecipient::new("bob@example.com")]);
        assert!(raw.has_body());
        assert!(raw.cc_recipients.is_empty());
    }
}
