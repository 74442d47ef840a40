//! Message bus seam.
//!
//! Everything the engine needs from the transport is expressed by the
//! [`Bus`] trait: enumerating connections, resolving their owning pid, and
//! the handful of remote calls of the introspection protocol. The
//! production implementation in [`dbus`] talks to a real D-Bus daemon via
//! zbus; tests use the in-memory `mock_bus::MockBus`.

pub mod dbus;
pub mod wire;

pub use dbus::ZBus;
pub use wire::{RawNode, RawState, WireValue};

use crate::constants::dbus_errors;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    /// The remote side replied with a named error.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// Connection or I/O failure below the protocol level.
    #[error("bus transport error: {0}")]
    Transport(String),

    /// The reply arrived but did not have the expected shape.
    #[error("could not decode reply: {0}")]
    Decode(String),
}

impl BusError {
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        BusError::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Name of the remote error, if the failure was a remote reply.
    pub fn remote_name(&self) -> Option<&str> {
        match self {
            BusError::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The endpoint does not implement the requested method or interface.
    pub fn is_not_implemented(&self) -> bool {
        matches!(
            self.remote_name(),
            Some(dbus_errors::UNKNOWN_METHOD) | Some(dbus_errors::UNKNOWN_INTERFACE)
        )
    }

    /// The destination connection no longer exists.
    pub fn is_service_unknown(&self) -> bool {
        self.remote_name() == Some(dbus_errors::SERVICE_UNKNOWN)
    }

    pub fn is_name_has_no_owner(&self) -> bool {
        self.remote_name() == Some(dbus_errors::NAME_HAS_NO_OWNER)
    }
}

impl From<BusError> for bp_common::Error {
    fn from(err: BusError) -> Self {
        let name = err.remote_name().map(str::to_string);
        bp_common::Error::Bus {
            name,
            message: err.to_string(),
        }
    }
}

/// Which bus to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BusSelector {
    #[default]
    Session,
    System,
    /// A custom bus address such as `unix:path=/tmp/test-bus`.
    Custom(String),
}

impl BusSelector {
    /// Bus address for custom buses.
    pub fn address(&self) -> Option<&str> {
        match self {
            BusSelector::Custom(address) => Some(address),
            _ => None,
        }
    }
}

impl FromStr for BusSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "session" => BusSelector::Session,
            "system" => BusSelector::System,
            other => BusSelector::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for BusSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusSelector::Session => write!(f, "session"),
            BusSelector::System => write!(f, "system"),
            BusSelector::Custom(_) => write!(f, "custom"),
        }
    }
}

/// Remote calls the engine consumes from the bus.
///
/// Implementations must be shareable across threads: the asynchronous
/// proxy builder issues its round trips from a worker thread.
pub trait Bus: Send + Sync + fmt::Debug {
    /// Which bus this handle is connected to. Used as the bus identity in
    /// equality keys.
    fn selector(&self) -> &BusSelector;

    /// All connection names currently on the bus.
    fn list_names(&self) -> Result<Vec<String>, BusError>;

    /// Pid of the process owning `connection`.
    fn connection_pid(&self, connection: &str) -> Result<u32, BusError>;

    /// Generic introspection document for `path` on `connection`.
    fn introspect(&self, connection: &str, path: &str) -> Result<String, BusError>;

    /// Wire protocol version spoken by the endpoint.
    fn get_version(&self, connection: &str, path: &str) -> Result<String, BusError>;

    /// Evaluate a selection query and return the matching objects.
    fn get_state(&self, connection: &str, path: &str, query: &[u8])
        -> Result<Vec<RawNode>, BusError>;

    fn list_signals(&self, connection: &str, path: &str, object_id: i64)
        -> Result<Vec<String>, BusError>;

    fn list_methods(&self, connection: &str, path: &str, object_id: i64)
        -> Result<Vec<String>, BusError>;

    fn register_signal_interest(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<(), BusError>;

    /// Argument lists of every emission recorded since interest was registered.
    fn get_signal_emissions(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<Vec<Vec<WireValue>>, BusError>;

    fn invoke_method(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        method: &str,
        args: &[WireValue],
    ) -> Result<(), BusError>;
}

/// Open a connection to the selected bus.
pub fn connect(selector: &BusSelector) -> Result<Arc<dyn Bus>, BusError> {
    let bus = ZBus::connect(selector.clone())?;
    Ok(Arc::new(bus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parses_well_known_buses() {
        assert_eq!("session".parse::<BusSelector>().unwrap(), BusSelector::Session);
        assert_eq!("system".parse::<BusSelector>().unwrap(), BusSelector::System);
        assert_eq!(
            "unix:path=/tmp/bus".parse::<BusSelector>().unwrap(),
            BusSelector::Custom("unix:path=/tmp/bus".to_string())
        );
    }

    #[test]
    fn selector_display_hides_custom_address() {
        let custom = BusSelector::Custom("unix:path=/tmp/bus".to_string());
        assert_eq!(custom.to_string(), "custom");
        assert_eq!(custom.address(), Some("unix:path=/tmp/bus"));
        assert_eq!(BusSelector::Session.address(), None);
    }

    #[test]
    fn not_implemented_covers_method_and_interface() {
        assert!(BusError::remote(dbus_errors::UNKNOWN_METHOD, "no").is_not_implemented());
        assert!(BusError::remote(dbus_errors::UNKNOWN_INTERFACE, "no").is_not_implemented());
        assert!(!BusError::remote(dbus_errors::SERVICE_UNKNOWN, "gone").is_not_implemented());
        assert!(!BusError::Transport("reset".into()).is_not_implemented());
    }

    #[test]
    fn bus_error_converts_with_remote_name() {
        let err: bp_common::Error = BusError::remote(dbus_errors::SERVICE_UNKNOWN, "gone").into();
        match err {
            bp_common::Error::Bus { name, .. } => {
                assert_eq!(name.as_deref(), Some(dbus_errors::SERVICE_UNKNOWN))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
