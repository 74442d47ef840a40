//! Error types for busprobe.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ No Matching Connection
//!   Reason: search for pid = 1234 returned no results
//!   Fix: Check that the application was started with introspection enabled...
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 21,
//!   "category": "search",
//!   "message": "search for pid = 1234 returned no results",
//!   "recoverable": true,
//!   "suggested_action": "relaunch",
//!   "context": { "criteria": "pid = 1234" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for busprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller supplied an invalid search or query.
    Config,
    /// Connection discovery failed.
    Search,
    /// The endpoint was found but could not be introspected.
    Introspection,
    /// Transport-level failures.
    Bus,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Search => write!(f, "search"),
            ErrorCategory::Introspection => write!(f, "introspection"),
            ErrorCategory::Bus => write!(f, "bus"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for agents to take in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Fix the search parameters or query and try again.
    FixArguments,
    /// Narrow the search so that only one connection matches.
    Narrow,
    /// Start (or restart) the application under test.
    Relaunch,
    /// Upgrade one side so both agree on the wire protocol.
    Upgrade,
    /// Abort the operation.
    Abort,
    /// Manual intervention required.
    ManualIntervention,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::FixArguments => write!(f, "fix_arguments"),
            SuggestedAction::Narrow => write!(f, "narrow"),
            SuggestedAction::Relaunch => write!(f, "relaunch"),
            SuggestedAction::Upgrade => write!(f, "upgrade"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
        }
    }
}

/// Unified error type for busprobe.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown search parameter: {key}")]
    UnknownSearchKey { key: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("supplied pid {pid} does not match process handle pid {process_pid}")]
    ProcessMismatch { pid: u32, process_pid: u32 },

    // Search errors (20-29)
    #[error("process exited with code {exit_code} before a connection was found")]
    ProcessExited { exit_code: i32 },

    #[error("search for {criteria} returned no results")]
    NoResults { criteria: String },

    #[error("search for {criteria} returned {count} results")]
    AmbiguousResults { criteria: String, count: usize },

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("no running process named {name}")]
    ProcessNameNotFound { name: String },

    // Introspection errors (30-39)
    #[error("could not find the introspection interface on {address}")]
    CapabilityDiscovery { address: String },

    #[error("wire protocol mismatch on {address}: expected {expected}, got {actual}")]
    ProtocolMismatch {
        address: String,
        expected: String,
        actual: String,
    },

    #[error("object {type_name} with id {id} no longer exists")]
    StateNotFound { type_name: String, id: i64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("more than one proxy class matches {path}: {}", .candidates.join(", "))]
    AmbiguousProxyClass {
        path: String,
        candidates: Vec<String>,
    },

    #[error("signal {signal} does not exist on object {type_name}")]
    InvalidSignal { signal: String, type_name: String },

    #[error("slot {slot} does not exist on object {type_name}")]
    InvalidSlot { slot: String, type_name: String },

    // Bus errors (40-49)
    #[error("bus error: {message}")]
    Bus {
        name: Option<String>,
        message: String,
    },

    #[error("Lost dbus backend communication. It appears the application under test exited before the test finished!")]
    BackendLost,

    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    WaitTimeout { what: String, timeout_ms: u64 },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Search errors
    /// - 30-39: Introspection errors
    /// - 40-49: Bus errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::UnknownSearchKey { .. } => 11,
            Error::InvalidQuery(_) => 12,
            Error::ProcessMismatch { .. } => 13,
            Error::ProcessExited { .. } => 20,
            Error::NoResults { .. } => 21,
            Error::AmbiguousResults { .. } => 22,
            Error::ProcessNotFound { .. } => 23,
            Error::ProcessNameNotFound { .. } => 24,
            Error::CapabilityDiscovery { .. } => 30,
            Error::ProtocolMismatch { .. } => 31,
            Error::StateNotFound { .. } => 32,
            Error::InvalidState(_) => 33,
            Error::AmbiguousProxyClass { .. } => 34,
            Error::InvalidSignal { .. } => 35,
            Error::InvalidSlot { .. } => 36,
            Error::Bus { .. } => 40,
            Error::BackendLost => 41,
            Error::WaitTimeout { .. } => 42,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::UnknownSearchKey { .. }
            | Error::InvalidQuery(_)
            | Error::ProcessMismatch { .. } => ErrorCategory::Config,

            Error::ProcessExited { .. }
            | Error::NoResults { .. }
            | Error::AmbiguousResults { .. }
            | Error::ProcessNotFound { .. }
            | Error::ProcessNameNotFound { .. } => ErrorCategory::Search,

            Error::CapabilityDiscovery { .. }
            | Error::ProtocolMismatch { .. }
            | Error::StateNotFound { .. }
            | Error::InvalidState(_)
            | Error::AmbiguousProxyClass { .. }
            | Error::InvalidSignal { .. }
            | Error::InvalidSlot { .. } => ErrorCategory::Introspection,

            Error::Bus { .. } | Error::BackendLost | Error::WaitTimeout { .. } => {
                ErrorCategory::Bus
            }

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// Search outcomes that more waiting cannot change (ambiguity, a dead
    /// process) are terminal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::UnknownSearchKey { .. } => true,
            Error::InvalidQuery(_) => true,
            Error::ProcessMismatch { .. } => true,

            Error::ProcessExited { .. } => false,
            Error::NoResults { .. } => true,
            Error::AmbiguousResults { .. } => false,
            Error::ProcessNotFound { .. } => false,
            Error::ProcessNameNotFound { .. } => true,

            Error::CapabilityDiscovery { .. } => false,
            Error::ProtocolMismatch { .. } => false,
            Error::StateNotFound { .. } => false,
            Error::InvalidState(_) => false,
            Error::AmbiguousProxyClass { .. } => true,
            Error::InvalidSignal { .. } => true,
            Error::InvalidSlot { .. } => true,

            Error::Bus { .. } => true,
            Error::BackendLost => false,
            Error::WaitTimeout { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns the suggested action for agents.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_)
            | Error::UnknownSearchKey { .. }
            | Error::InvalidQuery(_)
            | Error::ProcessMismatch { .. } => SuggestedAction::FixArguments,

            Error::ProcessExited { .. } => SuggestedAction::Relaunch,
            Error::NoResults { .. } => SuggestedAction::Relaunch,
            Error::AmbiguousResults { .. } => SuggestedAction::Narrow,
            Error::ProcessNotFound { .. } => SuggestedAction::Relaunch,
            Error::ProcessNameNotFound { .. } => SuggestedAction::Relaunch,

            Error::CapabilityDiscovery { .. } => SuggestedAction::ManualIntervention,
            Error::ProtocolMismatch { .. } => SuggestedAction::Upgrade,
            Error::StateNotFound { .. } => SuggestedAction::Abort,
            Error::InvalidState(_) => SuggestedAction::ManualIntervention,
            Error::AmbiguousProxyClass { .. } => SuggestedAction::FixArguments,
            Error::InvalidSignal { .. } => SuggestedAction::FixArguments,
            Error::InvalidSlot { .. } => SuggestedAction::FixArguments,

            Error::Bus { .. } => SuggestedAction::Retry,
            Error::BackendLost => SuggestedAction::Relaunch,
            Error::WaitTimeout { .. } => SuggestedAction::Retry,

            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Check the configuration file syntax with 'busprobe config show'."
            }
            Error::UnknownSearchKey { .. } => {
                "Valid search parameters are: pid, connection_name, application_name, object_path."
            }
            Error::InvalidQuery(_) => {
                "Descendant wildcard selects need at least one filter, and parent selects take none."
            }
            Error::ProcessMismatch { .. } => {
                "Pass either a pid or a process handle, or make sure both refer to the same process."
            }

            Error::ProcessExited { .. } => {
                "The application crashed or exited during startup. Run it manually to see its output."
            }
            Error::NoResults { .. } => {
                "Check that the application was started with introspection enabled, or raise '--timeout'."
            }
            Error::AmbiguousResults { .. } => {
                "Add a pid, connection name, or application name to narrow the search."
            }
            Error::ProcessNotFound { .. } => {
                "The pid does not exist. The application may have exited already."
            }
            Error::ProcessNameNotFound { .. } => {
                "Start the application first, or check the process name with 'ps'."
            }

            Error::CapabilityDiscovery { .. } => {
                "The application is not loading the introspection plugin for its toolkit."
            }
            Error::ProtocolMismatch { .. } => {
                "The application's introspection plugin and busprobe speak different wire versions. Upgrade the older side."
            }
            Error::StateNotFound { .. } => {
                "The remote object was destroyed. Select it again from its parent."
            }
            Error::InvalidState(_) => {
                "The application sent malformed state. Report a bug against its introspection plugin."
            }
            Error::AmbiguousProxyClass { .. } => {
                "Make custom proxy classes validate more strictly so only one accepts each object."
            }
            Error::InvalidSignal { .. } => {
                "List the object's signals with 'signals()' and check the spelling."
            }
            Error::InvalidSlot { .. } => {
                "List the object's slots with 'slots()' and check the spelling."
            }

            Error::Bus { .. } => {
                "Check that the bus is reachable (DBUS_SESSION_BUS_ADDRESS) and retry."
            }
            Error::BackendLost => {
                "The application under test exited. Check its logs for a crash."
            }
            Error::WaitTimeout { .. } => {
                "The remote state did not reach the expected value in time. Retry with a longer timeout."
            }

            Error::Io(_) => "Check permissions and that config directories exist. Retry the operation.",
            Error::Json(_) => "Internal serialization failure. Report a bug.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::UnknownSearchKey { .. } => "Unknown Search Parameter",
            Error::InvalidQuery(_) => "Invalid Query",
            Error::ProcessMismatch { .. } => "Process Mismatch",

            Error::ProcessExited { .. } => "Process Exited",
            Error::NoResults { .. } => "No Matching Connection",
            Error::AmbiguousResults { .. } => "Ambiguous Search Result",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::ProcessNameNotFound { .. } => "Process Not Found",

            Error::CapabilityDiscovery { .. } => "Introspection Unavailable",
            Error::ProtocolMismatch { .. } => "Wire Protocol Mismatch",
            Error::StateNotFound { .. } => "Object Destroyed",
            Error::InvalidState(_) => "Invalid Remote State",
            Error::AmbiguousProxyClass { .. } => "Ambiguous Proxy Class",
            Error::InvalidSignal { .. } => "Unknown Signal",
            Error::InvalidSlot { .. } => "Unknown Slot",

            Error::Bus { .. } => "Bus Error",
            Error::BackendLost => "Application Exited",
            Error::WaitTimeout { .. } => "Wait Timeout",

            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action for agents.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., criteria, versions).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::UnknownSearchKey { key } => {
                context.insert("key".to_string(), serde_json::json!(key));
            }
            Error::ProcessMismatch { pid, process_pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
                context.insert("process_pid".to_string(), serde_json::json!(process_pid));
            }
            Error::ProcessExited { exit_code } => {
                context.insert("exit_code".to_string(), serde_json::json!(exit_code));
            }
            Error::NoResults { criteria } => {
                context.insert("criteria".to_string(), serde_json::json!(criteria));
            }
            Error::AmbiguousResults { criteria, count } => {
                context.insert("criteria".to_string(), serde_json::json!(criteria));
                context.insert("count".to_string(), serde_json::json!(count));
            }
            Error::ProcessNotFound { pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            Error::CapabilityDiscovery { address } => {
                context.insert("address".to_string(), serde_json::json!(address));
            }
            Error::ProtocolMismatch {
                address,
                expected,
                actual,
            } => {
                context.insert("address".to_string(), serde_json::json!(address));
                context.insert("expected_version".to_string(), serde_json::json!(expected));
                context.insert("actual_version".to_string(), serde_json::json!(actual));
            }
            Error::StateNotFound { type_name, id } => {
                context.insert("type_name".to_string(), serde_json::json!(type_name));
                context.insert("id".to_string(), serde_json::json!(id));
            }
            Error::Bus {
                name: Some(name), ..
            } => {
                context.insert("bus_error".to_string(), serde_json::json!(name));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }

    /// Serialize to pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_json())
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::UnknownSearchKey { key: "colour".into() }.code(), 11);
        assert_eq!(Error::ProcessExited { exit_code: 1 }.code(), 20);
        assert_eq!(Error::BackendLost.code(), 41);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::UnknownSearchKey { key: "x".into() }.category(),
            ErrorCategory::Config
        );
        assert_eq!(
            Error::NoResults {
                criteria: "pid = 1".into()
            }
            .category(),
            ErrorCategory::Search
        );
        assert_eq!(
            Error::ProtocolMismatch {
                address: "a".into(),
                expected: "1.4".into(),
                actual: "1.2".into()
            }
            .category(),
            ErrorCategory::Introspection
        );
    }

    #[test]
    fn terminal_search_outcomes_are_not_recoverable() {
        assert!(!Error::ProcessExited { exit_code: -9 }.is_recoverable());
        assert!(!Error::AmbiguousResults {
            criteria: String::new(),
            count: 2
        }
        .is_recoverable());
        assert!(Error::NoResults {
            criteria: String::new()
        }
        .is_recoverable());
    }

    #[test]
    fn test_suggested_action() {
        assert_eq!(
            Error::AmbiguousResults {
                criteria: String::new(),
                count: 3
            }
            .suggested_action(),
            SuggestedAction::Narrow
        );
        assert_eq!(
            Error::ProtocolMismatch {
                address: String::new(),
                expected: "1.4".into(),
                actual: "1.2".into()
            }
            .suggested_action(),
            SuggestedAction::Upgrade
        );
    }

    #[test]
    fn structured_error_carries_versions() {
        let err = Error::ProtocolMismatch {
            address: "<session bus :1.5 /x>".into(),
            expected: "1.4".into(),
            actual: "1.2".into(),
        };
        let structured = StructuredError::from(&err);

        assert_eq!(structured.code, 31);
        assert_eq!(structured.category, ErrorCategory::Introspection);
        assert_eq!(
            structured.context.get("expected_version"),
            Some(&serde_json::json!("1.4"))
        );
        assert_eq!(
            structured.context.get("actual_version"),
            Some(&serde_json::json!("1.2"))
        );
    }

    #[test]
    fn structured_error_json() {
        let err = Error::AmbiguousResults {
            criteria: "application name = 'calc'".into(),
            count: 2,
        };
        let json = StructuredError::from(&err).to_json();

        assert!(json.contains(r#""code":22"#));
        assert!(json.contains(r#""category":"search""#));
        assert!(json.contains(r#""recoverable":false"#));
        assert!(json.contains(r#""count":2"#));
    }

    #[test]
    fn ambiguous_proxy_class_lists_candidates() {
        let err = Error::AmbiguousProxyClass {
            path: "/calc/Button".into(),
            candidates: vec!["Button".into(), "OkButton".into()],
        };
        assert_eq!(
            err.to_string(),
            "more than one proxy class matches /calc/Button: Button, OkButton"
        );
    }

    #[test]
    fn test_format_error_human() {
        let err = Error::NoResults {
            criteria: "pid = 1234".into(),
        };
        let formatted = format_error_human(&err, false);

        assert!(formatted.contains("No Matching Connection"));
        assert!(formatted.contains("search for pid = 1234 returned no results"));
        assert!(formatted.contains("--timeout"));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Config.to_string(), "config");
        assert_eq!(ErrorCategory::Introspection.to_string(), "introspection");
    }

    #[test]
    fn test_suggested_action_display() {
        assert_eq!(SuggestedAction::Retry.to_string(), "retry");
        assert_eq!(SuggestedAction::FixArguments.to_string(), "fix_arguments");
    }
}
