//! Message module.
//!
//! This module contains everything related to messages: the raw
//! provider payload, the canonical model and the normalizer turning
//! the former into the latter.

mod attachment;
pub use attachment::*;

mod message;
pub use message::*;

pub mod raw;
pub use raw::*;

pub mod normalizer;
pub use normalizer::{
    body_parts, clean_message_id, message_key, new_correlation_token, Normalizer,
};
