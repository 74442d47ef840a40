//! zbus-backed [`Bus`] implementation.

use super::wire::{RawNode, RawState, WireValue};
use super::{Bus, BusError, BusSelector};
use crate::constants::{AP_INTROSPECTION_IFACE, DBUS_INTROSPECTION_IFACE, QT_AUTOPILOT_IFACE};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::Connection;
use zbus::names::BusName;
use zbus::zvariant::{DynamicType, OwnedValue, Signature, Type, Value};
use zbus::DBusError;

/// An `a{sv}` dictionary decoded in wire order.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct OrderedProperties(IndexMap<String, OwnedValue>);

impl Type for OrderedProperties {
    fn signature() -> Signature<'static> {
        <HashMap<String, OwnedValue> as Type>::signature()
    }
}

/// A blocking connection to a D-Bus daemon.
pub struct ZBus {
    selector: BusSelector,
    connection: Connection,
}

impl fmt::Debug for ZBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZBus")
            .field("selector", &self.selector)
            .field("unique_name", &self.connection.unique_name())
            .finish()
    }
}

impl ZBus {
    pub fn connect(selector: BusSelector) -> Result<Self, BusError> {
        let connection = match &selector {
            BusSelector::Session => Connection::session()?,
            BusSelector::System => Connection::system()?,
            BusSelector::Custom(address) => {
                zbus::blocking::connection::Builder::address(address.as_str())?.build()?
            }
        };
        Ok(ZBus {
            selector,
            connection,
        })
    }

    fn call<B>(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<zbus::Message, BusError>
    where
        B: serde::Serialize + DynamicType,
    {
        tracing::trace!(destination, path, interface, method, "bus call");
        Ok(self
            .connection
            .call_method(Some(destination), path, Some(interface), method, body)?)
    }

    fn daemon(&self) -> Result<DBusProxy<'_>, BusError> {
        Ok(DBusProxy::new(&self.connection)?)
    }
}

impl Bus for ZBus {
    fn selector(&self) -> &BusSelector {
        &self.selector
    }

    fn list_names(&self) -> Result<Vec<String>, BusError> {
        let names = self.daemon()?.list_names()?;
        Ok(names.into_iter().map(|name| name.to_string()).collect())
    }

    fn connection_pid(&self, connection: &str) -> Result<u32, BusError> {
        let name = BusName::try_from(connection).map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(self.daemon()?.get_connection_unix_process_id(name)?)
    }

    fn introspect(&self, connection: &str, path: &str) -> Result<String, BusError> {
        let reply = self.call(connection, path, DBUS_INTROSPECTION_IFACE, "Introspect", &())?;
        Ok(reply.body().deserialize::<String>()?)
    }

    fn get_version(&self, connection: &str, path: &str) -> Result<String, BusError> {
        let reply = self.call(connection, path, AP_INTROSPECTION_IFACE, "GetVersion", &())?;
        Ok(reply.body().deserialize::<String>()?)
    }

    fn get_state(
        &self,
        connection: &str,
        path: &str,
        query: &[u8],
    ) -> Result<Vec<RawNode>, BusError> {
        let query = String::from_utf8_lossy(query);
        let reply = self.call(
            connection,
            path,
            AP_INTROSPECTION_IFACE,
            "GetState",
            &(query.as_ref(),),
        )?;
        let body: Vec<(String, OrderedProperties)> = reply.body().deserialize()?;

        Ok(body
            .into_iter()
            .map(|(node_path, properties)| {
                let state: RawState = properties
                    .0
                    .iter()
                    .map(|(name, value)| (name.clone(), wire_value(value)))
                    .collect();
                RawNode::new(node_path.into_bytes(), state)
            })
            .collect())
    }

    fn list_signals(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
    ) -> Result<Vec<String>, BusError> {
        let reply = self.call(
            connection,
            path,
            QT_AUTOPILOT_IFACE,
            "ListSignals",
            &(qt_object_id(object_id)?,),
        )?;
        Ok(reply.body().deserialize::<Vec<String>>()?)
    }

    fn list_methods(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
    ) -> Result<Vec<String>, BusError> {
        let reply = self.call(
            connection,
            path,
            QT_AUTOPILOT_IFACE,
            "ListMethods",
            &(qt_object_id(object_id)?,),
        )?;
        Ok(reply.body().deserialize::<Vec<String>>()?)
    }

    fn register_signal_interest(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<(), BusError> {
        self.call(
            connection,
            path,
            QT_AUTOPILOT_IFACE,
            "RegisterSignalInterest",
            &(qt_object_id(object_id)?, signal),
        )?;
        Ok(())
    }

    fn get_signal_emissions(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<Vec<Vec<WireValue>>, BusError> {
        let reply = self.call(
            connection,
            path,
            QT_AUTOPILOT_IFACE,
            "GetSignalEmissions",
            &(qt_object_id(object_id)?, signal),
        )?;
        let emissions: Vec<Vec<OwnedValue>> = reply.body().deserialize()?;
        Ok(emissions
            .iter()
            .map(|args| args.iter().map(|v| wire_value(v)).collect())
            .collect())
    }

    fn invoke_method(
        &self,
        connection: &str,
        path: &str,
        object_id: i64,
        method: &str,
        args: &[WireValue],
    ) -> Result<(), BusError> {
        let args: Vec<Value<'static>> = args.iter().map(dbus_value).collect();
        self.call(
            connection,
            path,
            QT_AUTOPILOT_IFACE,
            "InvokeMethod",
            &(qt_object_id(object_id)?, method, args),
        )?;
        Ok(())
    }
}

/// The Qt extension addresses objects by 32-bit id.
fn qt_object_id(object_id: i64) -> Result<i32, BusError> {
    i32::try_from(object_id)
        .map_err(|_| BusError::Decode(format!("object id {object_id} out of range")))
}

fn wire_value(value: &Value<'_>) -> WireValue {
    match value {
        Value::Bool(v) => WireValue::Bool(*v),
        Value::U8(v) => WireValue::UInt(u64::from(*v)),
        Value::U16(v) => WireValue::UInt(u64::from(*v)),
        Value::U32(v) => WireValue::UInt(u64::from(*v)),
        Value::U64(v) => WireValue::UInt(*v),
        Value::I16(v) => WireValue::Int(i64::from(*v)),
        Value::I32(v) => WireValue::Int(i64::from(*v)),
        Value::I64(v) => WireValue::Int(*v),
        Value::F64(v) => WireValue::Double(*v),
        Value::Str(s) => WireValue::Text(s.to_string()),
        Value::Signature(s) => WireValue::Text(s.to_string()),
        Value::ObjectPath(p) => WireValue::Text(p.to_string()),
        Value::Value(inner) => wire_value(inner),
        Value::Array(array) => {
            if array.element_signature().as_str() == "y" {
                let bytes = array
                    .iter()
                    .filter_map(|v| match v {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                WireValue::Bytes(bytes)
            } else {
                WireValue::List(array.iter().map(wire_value).collect())
            }
        }
        Value::Structure(structure) => {
            WireValue::List(structure.fields().iter().map(wire_value).collect())
        }
        other => WireValue::Text(format!("{other:?}")),
    }
}

fn dbus_value(value: &WireValue) -> Value<'static> {
    match value {
        WireValue::Bool(v) => Value::from(*v),
        WireValue::Int(v) => Value::from(*v),
        WireValue::UInt(v) => Value::from(*v),
        WireValue::Double(v) => Value::from(*v),
        WireValue::Text(v) => Value::from(v.clone()),
        WireValue::Bytes(v) => Value::from(v.clone()),
        WireValue::List(items) => Value::from(items.iter().map(dbus_value).collect::<Vec<_>>()),
    }
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, detail, _) => BusError::Remote {
                name: name.to_string(),
                message: detail.unwrap_or_default(),
            },
            zbus::Error::FDO(fdo) => (*fdo).into(),
            zbus::Error::Variant(e) => BusError::Decode(e.to_string()),
            other => BusError::Transport(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for BusError {
    fn from(err: zbus::fdo::Error) -> Self {
        match err {
            zbus::fdo::Error::ZBus(inner) => inner.into(),
            other => BusError::Remote {
                name: other.name().to_string(),
                message: other.description().unwrap_or_default().to_string(),
            },
        }
    }
}
