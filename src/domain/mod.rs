pub mod classify;
pub use classify::{Category, Classifier, PatternClassifier};

pub mod mailbox;
pub use mailbox::{MailboxConfig, SyncWatermark};

pub mod message;
pub use message::{
    body_parts, clean_message_id, message_key, new_correlation_token, participants, Attachment,
    AttachmentContent, Direction, Message, Normalizer, RawAddress, RawAttachment, RawBody,
    RawHeader, RawMessage, RawRecipient,
};

pub mod thread;
pub use thread::{
    normalize_subject, Layer, Lookup, Resolution, ResolverConfig, Thread, ThreadResolver,
    ThreadStatus,
};
