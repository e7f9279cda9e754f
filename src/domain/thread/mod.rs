//! Thread module.
//!
//! This module contains everything related to conversation threads:
//! the model, its status state machine, subject normalization and the
//! resolver attaching messages to threads.

mod thread;
pub use thread::{Error as ThreadError, Thread, ThreadStatus};

mod subject;
pub use subject::normalize_subject;

pub mod resolver;
pub use resolver::{Layer, Lookup, Resolution, ResolverConfig, ThreadResolver};
