//! Remote endpoint addressing and wire protocol negotiation.

use crate::bus::{Bus, BusError, BusSelector, RawNode, WireValue};
use crate::constants::{CURRENT_WIRE_PROTOCOL_VERSION, LEGACY_WIRE_PROTOCOL_VERSION};
use crate::logging::{event_names, Stage};
use crate::process::pid_exists;
use bp_common::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Equality key of an endpoint: which bus, which connection, which path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey {
    pub bus: BusSelector,
    pub connection: String,
    pub object_path: String,
}

/// Endpoints whose wire protocol version has been verified.
///
/// Shared by every [`BusAddress`] built from the same context, so a tuple
/// is checked at most once per process no matter how many address values
/// refer to it. Only successful checks are recorded.
#[derive(Debug, Default)]
pub struct VersionCheckCache {
    checked: Mutex<HashSet<AddressKey>>,
}

impl VersionCheckCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_checked(&self, key: &AddressKey) -> bool {
        self.checked
            .lock()
            .map(|checked| checked.contains(key))
            .unwrap_or(false)
    }

    fn mark_checked(&self, key: AddressKey) {
        if let Ok(mut checked) = self.checked.lock() {
            checked.insert(key);
        }
    }

    pub fn len(&self) -> usize {
        self.checked.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One remote endpoint: a bus, a connection on it, and an object path.
#[derive(Clone)]
pub struct BusAddress {
    bus: Arc<dyn Bus>,
    connection: String,
    object_path: String,
    versions: Arc<VersionCheckCache>,
}

impl BusAddress {
    pub fn new(
        bus: Arc<dyn Bus>,
        connection: impl Into<String>,
        object_path: impl Into<String>,
        versions: Arc<VersionCheckCache>,
    ) -> Self {
        BusAddress {
            bus,
            connection: connection.into(),
            object_path: object_path.into(),
            versions,
        }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn key(&self) -> AddressKey {
        AddressKey {
            bus: self.bus.selector().clone(),
            connection: self.connection.clone(),
            object_path: self.object_path.clone(),
        }
    }

    /// Generic introspection document. Does not require a version check.
    pub fn introspect(&self) -> Result<String> {
        Ok(self.bus.introspect(&self.connection, &self.object_path)?)
    }

    /// Verify that the endpoint speaks our wire protocol version.
    ///
    /// The first successful check for this address tuple is memoized; a
    /// mismatch is raised again on every call.
    pub fn ensure_protocol_version(&self) -> Result<()> {
        let key = self.key();
        if self.versions.is_checked(&key) {
            return Ok(());
        }

        let version = match self.bus.get_version(&self.connection, &self.object_path) {
            Ok(version) => version,
            Err(e) if e.is_not_implemented() => LEGACY_WIRE_PROTOCOL_VERSION.to_string(),
            Err(e) => return Err(e.into()),
        };

        if version != CURRENT_WIRE_PROTOCOL_VERSION {
            tracing::warn!(
                target: event_names::VERSION_MISMATCH,
                stage = %Stage::Handshake,
                address = %self,
                expected = CURRENT_WIRE_PROTOCOL_VERSION,
                actual = %version,
                "wire protocol mismatch"
            );
            return Err(Error::ProtocolMismatch {
                address: self.to_string(),
                expected: CURRENT_WIRE_PROTOCOL_VERSION.to_string(),
                actual: version,
            });
        }

        tracing::debug!(
            target: event_names::VERSION_CHECKED,
            stage = %Stage::Handshake,
            address = %self,
            version = %version
        );
        self.versions.mark_checked(key);
        Ok(())
    }

    /// Run a GetState query after negotiating the protocol version.
    pub fn get_state(&self, query: &[u8]) -> Result<Vec<RawNode>> {
        self.ensure_protocol_version()?;
        self.bus
            .get_state(&self.connection, &self.object_path, query)
            .map_err(state_error)
    }

    pub fn list_signals(&self, object_id: i64) -> Result<Vec<String>> {
        Ok(self
            .bus
            .list_signals(&self.connection, &self.object_path, object_id)?)
    }

    pub fn list_methods(&self, object_id: i64) -> Result<Vec<String>> {
        Ok(self
            .bus
            .list_methods(&self.connection, &self.object_path, object_id)?)
    }

    pub fn register_signal_interest(&self, object_id: i64, signal: &str) -> Result<()> {
        Ok(self.bus.register_signal_interest(
            &self.connection,
            &self.object_path,
            object_id,
            signal,
        )?)
    }

    pub fn get_signal_emissions(&self, object_id: i64, signal: &str) -> Result<Vec<Vec<WireValue>>> {
        Ok(self
            .bus
            .get_signal_emissions(&self.connection, &self.object_path, object_id, signal)?)
    }

    pub fn invoke_method(&self, object_id: i64, method: &str, args: &[WireValue]) -> Result<()> {
        Ok(self.bus.invoke_method(
            &self.connection,
            &self.object_path,
            object_id,
            method,
            args,
        )?)
    }

    /// Pid owning the connection.
    pub fn owner_pid(&self) -> Result<u32> {
        Ok(self.bus.connection_pid(&self.connection)?)
    }

    /// Whether the process behind the connection is still running.
    pub fn is_alive(&self) -> bool {
        match self.bus.connection_pid(&self.connection) {
            Ok(pid) => pid_exists(pid),
            Err(_) => false,
        }
    }
}

/// A vanished destination during a state query means the application died.
pub(crate) fn state_error(err: BusError) -> Error {
    if err.is_service_unknown() {
        Error::BackendLost
    } else {
        err.into()
    }
}

impl PartialEq for BusAddress {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BusAddress {}

impl Hash for BusAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} bus {} {}>",
            self.bus.selector(),
            self.connection,
            self.object_path
        )
    }
}

impl fmt::Debug for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusAddress{}", self)
    }
}
