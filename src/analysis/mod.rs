//! Analysis modules.
//!
//! Metrics computed over the final record collection.

pub mod aggregator;

pub use aggregator::*;
