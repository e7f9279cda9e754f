//! Classify module.
//!
//! This module contains the categories assigned to new threads and
//! the classifiers computing them.

mod category;
pub use category::*;

mod classifier;
pub use classifier::*;
