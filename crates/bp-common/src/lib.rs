//! busprobe common types, IDs, and errors.
//!
//! This crate provides foundational types shared across bp-core modules:
//! - Process and bus connection identity types
//! - The unified error type with stable codes
//! - Output format selection

pub mod error;
pub mod id;
pub mod output;

pub use error::{Error, Result};
pub use id::{ConnectionName, ProcessId};
pub use output::OutputFormat;

/// Schema version for JSON payloads written to stdout.
pub const SCHEMA_VERSION: &str = "1.0.0";
