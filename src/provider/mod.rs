//! Provider module.
//!
//! This module exposes the provider trait, which can be used to plug
//! remote mailbox implementations, along with the retry policy
//! applied to provider calls and an in-memory implementation.

mod provider;
pub use provider::*;

pub mod memory;
pub use memory::{MemoryProvider, Op};

pub mod retry;
pub use retry::RetryPolicy;
