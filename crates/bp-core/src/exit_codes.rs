//! Exit codes for the busprobe CLI.
//!
//! Exit codes communicate the search outcome without requiring output
//! parsing. They are a stable contract for test harnesses.
//!
//! Exit code ranges:
//! - 0-3: Search outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal, I/O and transport errors

use bp_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Search outcomes (0-3)
    // ========================================================================
    /// Exactly one connection found / command succeeded
    Found = 0,

    /// No connection matched before the timeout
    NoResults = 1,

    /// More than one connection matched
    Ambiguous = 2,

    /// The monitored process exited during the search
    ProcessExited = 3,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration
    ArgsError = 10,

    /// Endpoint lacks the introspection capability
    CapabilityError = 11,

    /// Wire protocol version mismatch
    VersionError = 13,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// Bus transport error or lost backend
    BusError = 22,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Found
    }

    /// Search outcomes that are not errors in the tool itself (codes 0-9).
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the error code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Found => "OK_FOUND",
            ExitCode::NoResults => "NO_RESULTS",
            ExitCode::Ambiguous => "AMBIGUOUS",
            ExitCode::ProcessExited => "PROCESS_EXITED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::VersionError => "ERR_VERSION",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::BusError => "ERR_BUS",
        }
    }

    /// Map a library error onto its process exit code.
    pub fn for_error(err: &Error) -> ExitCode {
        match err {
            Error::NoResults { .. } | Error::ProcessNameNotFound { .. } => ExitCode::NoResults,
            Error::AmbiguousResults { .. } | Error::AmbiguousProxyClass { .. } => {
                ExitCode::Ambiguous
            }
            Error::ProcessExited { .. } | Error::ProcessNotFound { .. } => {
                ExitCode::ProcessExited
            }
            Error::Config(_)
            | Error::UnknownSearchKey { .. }
            | Error::InvalidQuery(_)
            | Error::ProcessMismatch { .. } => ExitCode::ArgsError,
            Error::CapabilityDiscovery { .. } => ExitCode::CapabilityError,
            Error::ProtocolMismatch { .. } => ExitCode::VersionError,
            Error::Bus { .. } | Error::BackendLost | Error::WaitTimeout { .. } => {
                ExitCode::BusError
            }
            Error::Io(_) | Error::Json(_) => ExitCode::IoError,
            Error::StateNotFound { .. }
            | Error::InvalidState(_)
            | Error::InvalidSignal { .. }
            | Error::InvalidSlot { .. } => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_outcomes_are_operational() {
        assert!(ExitCode::Found.is_success());
        assert!(ExitCode::NoResults.is_operational());
        assert!(ExitCode::ProcessExited.is_operational());
        assert!(!ExitCode::ArgsError.is_operational());
    }

    #[test]
    fn ranges_are_disjoint() {
        assert!(ExitCode::VersionError.is_user_error());
        assert!(ExitCode::BusError.is_internal_error());
        assert!(!ExitCode::BusError.is_user_error());
    }

    #[test]
    fn errors_map_to_stable_codes() {
        let cases = [
            (
                Error::NoResults {
                    criteria: "pid = 1".into(),
                },
                1,
            ),
            (
                Error::AmbiguousResults {
                    criteria: "pid = 1".into(),
                    count: 2,
                },
                2,
            ),
            (Error::ProcessExited { exit_code: 1 }, 3),
            (
                Error::UnknownSearchKey {
                    key: "colour".into(),
                },
                10,
            ),
            (
                Error::CapabilityDiscovery {
                    address: ":1.5".into(),
                },
                11,
            ),
            (
                Error::ProtocolMismatch {
                    address: ":1.5".into(),
                    expected: "1.4".into(),
                    actual: "1.2".into(),
                },
                13,
            ),
            (Error::BackendLost, 22),
        ];
        for (err, code) in cases {
            assert_eq!(ExitCode::for_error(&err).as_i32(), code, "{err}");
        }
    }

    #[test]
    fn display_includes_name_and_number() {
        assert_eq!(ExitCode::Ambiguous.to_string(), "AMBIGUOUS (2)");
    }
}
