//! Well-known bus names, object paths, interfaces, and protocol versions.

/// Object path on which applications expose the introspection protocol.
pub const AUTOPILOT_PATH: &str = "/com/canonical/Autopilot/Introspection";

/// Base introspection interface (GetVersion, GetState).
pub const AP_INTROSPECTION_IFACE: &str = "com.canonical.Autopilot.Introspection";

/// Qt toolkit extension interface (signals, slots).
pub const QT_AUTOPILOT_IFACE: &str = "com.canonical.Autopilot.Qt";

/// Generic D-Bus introspection interface.
pub const DBUS_INTROSPECTION_IFACE: &str = "org.freedesktop.DBus.Introspectable";

/// Well-known name of the bus daemon itself.
pub const BUS_DAEMON_NAME: &str = "org.freedesktop.DBus";

/// Wire protocol version this engine speaks.
pub const CURRENT_WIRE_PROTOCOL_VERSION: &str = "1.4";

/// Version assumed for endpoints that predate GetVersion.
pub const LEGACY_WIRE_PROTOCOL_VERSION: &str = "1.2";

/// Remote error names the engine reacts to.
pub mod dbus_errors {
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
}
