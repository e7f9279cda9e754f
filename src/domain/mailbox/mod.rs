//! Mailbox module.
//!
//! This module contains the mailbox configuration and its sync
//! watermark.

pub mod config;
pub use config::MailboxConfig;

mod watermark;
pub use watermark::*;
