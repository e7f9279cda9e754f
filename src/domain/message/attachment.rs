use serde::Serialize;

/// Represents the attachment metadata recorded locally for a message.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    /// Represents the provider attachment identifier. Like the
    /// message remote id, it can change over time.
    pub remote_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub is_inline: bool,
}

impl Attachment {
    pub fn matches_file_name(&self, file_name: &str) -> bool {
        self.file_name.trim().eq_ignore_ascii_case(file_name.trim())
    }
}

/// Represents the downloaded content of an attachment.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AttachmentContent {
    pub remote_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}
