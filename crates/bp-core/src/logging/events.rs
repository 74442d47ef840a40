//! Structured event definitions for logging.
//!
//! Events carry correlation IDs (run_id, host_id) and the stage of the run
//! they belong to. [`JsonlLayer`](super::JsonlLayer) hoists those fields to
//! the top level of each JSON line.

use serde::{Deserialize, Serialize};

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of a discovery and introspection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Connection search loop.
    Search,
    /// Individual filter evaluation.
    Filter,
    /// Capability and state handshake.
    Handshake,
    /// State queries against a built proxy.
    Query,
    /// Output rendering.
    Render,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Search => "search",
            Stage::Filter => "filter",
            Stage::Handshake => "handshake",
            Stage::Query => "query",
            Stage::Render => "render",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Search stage
    pub const SEARCH_STARTED: &str = "search.started";
    pub const SEARCH_PASS: &str = "search.pass";
    pub const SEARCH_FINISHED: &str = "search.finished";
    pub const SEARCH_PROCESS_EXITED: &str = "search.process_exited";
    pub const SEARCH_NO_RESULTS: &str = "search.no_results";
    pub const SEARCH_AMBIGUOUS: &str = "search.ambiguous";

    // Filter stage
    pub const FILTER_REJECTED: &str = "filter.rejected";

    // Protocol negotiation
    pub const VERSION_CHECKED: &str = "version.checked";
    pub const VERSION_MISMATCH: &str = "version.mismatch";

    // Handshake stage
    pub const HANDSHAKE_CAPABILITIES: &str = "handshake.capabilities";
    pub const HANDSHAKE_STATE: &str = "handshake.state";

    // Query stage
    pub const QUERY_ISSUED: &str = "query.issued";
    pub const QUERY_LARGE_REPLY: &str = "query.large_reply";
    pub const QUERY_ATTRIBUTE_SKIPPED: &str = "query.attribute_skipped";
    pub const CLASS_GENERATED: &str = "class.generated";

    // Config/init events
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";
}

/// Context for generating log events with consistent correlation IDs.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }
}
