//! busprobe Core Library
//!
//! This library provides the discovery and introspection engine:
//! - Connection search over a message bus with priority-ordered filters
//! - Bus endpoint addressing and wire protocol negotiation
//! - Proxy construction and a lazily navigated proxy object tree
//! - Configuration loading, structured logging and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod address;
pub mod backend;
pub mod bus;
pub mod config;
pub mod constants;
pub mod context;
pub mod exit_codes;
pub mod logging;
pub mod process;
pub mod proxy;
pub mod query;
pub mod search;
pub mod types;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_bus;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_process;

pub use address::{BusAddress, VersionCheckCache};
pub use context::ProbeContext;
pub use proxy::{ApplicationProxy, ProxyBuilder, ProxyNode};
pub use search::{ConnectionSearch, SearchCriteria};
