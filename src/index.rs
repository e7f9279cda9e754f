//! Search index module.
//!
//! This module exposes the seam messages are handed off through once
//! a batch is persisted. Index failures never roll back persisted
//! state.

use std::{
    result,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;

use crate::Message;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot index message {0}: {1}")]
    IndexMessageError(String, String),
}

pub type Result<T> = result::Result<T, Error>;

pub trait SearchIndex: Send + Sync {
    fn index(&self, messages: &[Message]) -> Result<()>;
}

/// Index dropping every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndex;

impl SearchIndex for NoopIndex {
    fn index(&self, _messages: &[Message]) -> Result<()> {
        Ok(())
    }
}

/// Index keeping the ids of the handed off messages in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    ids: Mutex<Vec<String>>,
}

impl MemoryIndex {
    pub fn ids(&self) -> Vec<String> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SearchIndex for MemoryIndex {
    fn index(&self, messages: &[Message]) -> Result<()> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(messages.iter().map(|message| message.id.clone()));
        Ok(())
    }
}
