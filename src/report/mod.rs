//! Report rendering and export.

pub mod generator;

pub use generator::*;
