//! Shared types for the convoy batching scheduler
//!
//! This crate holds the error type and `Result` alias used by every other
//! convoy crate. Keeping them here lets the core scheduler and the store
//! backends agree on one error surface without depending on each other.

pub mod error;

pub use error::{ConvoyError, Result};
