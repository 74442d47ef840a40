//! In-memory message bus for testing.
//!
//! `MockBus` answers every [`Bus`] call from scripted [`MockEndpoint`]s and
//! counts round trips per method, so tests can assert both outcomes and
//! cost.
//!
//! # Example
//!
//! ```ignore
//! use bp_core::mock_bus::{MockBus, MockEndpoint};
//!
//! let bus = MockBus::new()
//!     .with_endpoint(MockEndpoint::new(":1.5", 1234).application("calc").qt())
//!     .with_endpoint(MockEndpoint::new(":1.6", 1300).application("calendar"));
//! ```

use crate::bus::{Bus, BusError, BusSelector, RawNode, RawState, WireValue};
use crate::constants::{
    dbus_errors, AP_INTROSPECTION_IFACE, BUS_DAEMON_NAME, CURRENT_WIRE_PROTOCOL_VERSION,
    DBUS_INTROSPECTION_IFACE, QT_AUTOPILOT_IFACE,
};
use std::collections::HashMap;
use std::sync::Mutex;

const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Plain-typed attribute value: `[0, value]`.
pub fn plain(value: impl Into<WireValue>) -> WireValue {
    WireValue::List(vec![WireValue::Int(0), value.into()])
}

/// Build a state dictionary with the mandatory `id` plus extra attributes.
pub fn state_with_id(id: i64, attributes: Vec<(&str, WireValue)>) -> RawState {
    let mut state = RawState::new();
    state.insert("id".to_string(), plain(id));
    for (name, value) in attributes {
        state.insert(name.to_string(), value);
    }
    state
}

/// Build a `(path, state)` node.
pub fn node(path: &str, id: i64, attributes: Vec<(&str, WireValue)>) -> RawNode {
    RawNode::new(path.as_bytes().to_vec(), state_with_id(id, attributes))
}

/// Introspection document advertising the given interfaces.
pub fn introspection_xml(interfaces: &[&str]) -> String {
    let mut xml = String::from(
        "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\
         \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
    );
    for interface in interfaces {
        xml.push_str(&format!("  <interface name=\"{}\">\n  </interface>\n", interface));
    }
    xml.push_str("</node>\n");
    xml
}

/// One scripted connection on a [`MockBus`].
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    name: String,
    pid: Option<u32>,
    version: Option<String>,
    introspection: Option<String>,
    states: HashMap<String, Vec<RawNode>>,
    signals: HashMap<i64, Vec<String>>,
    methods: HashMap<i64, Vec<String>>,
    interests: Vec<(i64, String)>,
    emissions: HashMap<(i64, String), Vec<Vec<WireValue>>>,
    invocations: Vec<(i64, String, Vec<WireValue>)>,
}

impl MockEndpoint {
    /// A connection speaking the current protocol with only the base
    /// introspection interface.
    pub fn new(name: &str, pid: u32) -> Self {
        MockEndpoint {
            name: name.to_string(),
            pid: Some(pid),
            version: Some(CURRENT_WIRE_PROTOCOL_VERSION.to_string()),
            introspection: Some(introspection_xml(&[
                DBUS_INTROSPECTION_IFACE,
                AP_INTROSPECTION_IFACE,
            ])),
            states: HashMap::new(),
            signals: HashMap::new(),
            methods: HashMap::new(),
            interests: Vec::new(),
            emissions: HashMap::new(),
            invocations: Vec::new(),
        }
    }

    /// A connection that exposes nothing introspectable.
    pub fn plain(name: &str, pid: u32) -> Self {
        let mut endpoint = Self::new(name, pid);
        endpoint.introspection = Some(introspection_xml(&[DBUS_INTROSPECTION_IFACE]));
        endpoint.version = None;
        endpoint
    }

    /// Owning pid cannot be resolved.
    pub fn without_pid(mut self) -> Self {
        self.pid = None;
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn without_get_version(mut self) -> Self {
        self.version = None;
        self
    }

    pub fn introspection(mut self, xml: &str) -> Self {
        self.introspection = Some(xml.to_string());
        self
    }

    pub fn without_introspection(mut self) -> Self {
        self.introspection = None;
        self
    }

    /// Advertise the Qt extension interface.
    pub fn qt(mut self) -> Self {
        self.introspection = Some(introspection_xml(&[
            DBUS_INTROSPECTION_IFACE,
            AP_INTROSPECTION_IFACE,
            QT_AUTOPILOT_IFACE,
        ]));
        self
    }

    /// Root object `/<app>` with id 1, answered for both the pseudo root
    /// query `/` and the root's own refresh query `/<app>[id=1]`.
    pub fn application(self, app: &str) -> Self {
        self.application_with(app, Vec::new())
    }

    pub fn application_with(self, app: &str, attributes: Vec<(&str, WireValue)>) -> Self {
        let path = format!("/{}", app);
        let root = node(&path, 1, attributes);
        self.state("/", vec![root.clone()])
            .state(&format!("{}[id=1]", path), vec![root])
    }

    /// Reply for a specific query string.
    pub fn state(mut self, query: &str, nodes: Vec<RawNode>) -> Self {
        self.states.insert(query.to_string(), nodes);
        self
    }

    pub fn signals(mut self, object_id: i64, signals: &[&str]) -> Self {
        self.signals
            .insert(object_id, signals.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn methods(mut self, object_id: i64, methods: &[&str]) -> Self {
        self.methods
            .insert(object_id, methods.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// An in-memory [`Bus`].
#[derive(Debug)]
pub struct MockBus {
    selector: BusSelector,
    endpoints: Mutex<Vec<MockEndpoint>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            selector: BusSelector::Session,
            endpoints: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(selector: BusSelector) -> Self {
        MockBus {
            selector,
            ..Self::new()
        }
    }

    pub fn with_endpoint(self, endpoint: MockEndpoint) -> Self {
        self.add_endpoint(endpoint);
        self
    }

    pub fn add_endpoint(&self, endpoint: MockEndpoint) {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.push(endpoint);
        }
    }

    pub fn remove_endpoint(&self, name: &str) {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.retain(|e| e.name != name);
        }
    }

    /// Replace the reply for `query` on connection `name`.
    pub fn set_state(&self, name: &str, query: &str, nodes: Vec<RawNode>) {
        let _ = self.with(name, |e| {
            e.states.insert(query.to_string(), nodes);
        });
    }

    /// Record a signal emission, visible only if interest was registered.
    pub fn emit(&self, name: &str, object_id: i64, signal: &str, args: Vec<WireValue>) {
        let _ = self.with(name, |e| {
            let key = (object_id, signal.to_string());
            if e.interests.contains(&key) {
                e.emissions.entry(key).or_default().push(args);
            }
        });
    }

    /// Methods invoked on connection `name`, in order.
    pub fn invocations(&self, name: &str) -> Vec<(i64, String, Vec<WireValue>)> {
        self.endpoints
            .lock()
            .ok()
            .and_then(|endpoints| {
                endpoints
                    .iter()
                    .find(|e| e.name == name)
                    .map(|e| e.invocations.clone())
            })
            .unwrap_or_default()
    }

    /// Number of round trips made for `method` (e.g. "GetState").
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(method).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.values().sum()).unwrap_or(0)
    }

    fn count(&self, method: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(method).or_insert(0) += 1;
        }
    }

    fn with<T>(&self, name: &str, f: impl FnOnce(&mut MockEndpoint) -> T) -> Result<T, BusError> {
        let mut endpoints = self
            .endpoints
            .lock()
            .map_err(|_| BusError::Transport("mock bus poisoned".into()))?;
        endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .map(f)
            .ok_or_else(|| {
                BusError::remote(
                    dbus_errors::SERVICE_UNKNOWN,
                    format!("The name {} was not provided by any .service files", name),
                )
            })
    }
}

impl Bus for MockBus {
    fn selector(&self) -> &BusSelector {
        &self.selector
    }

    fn list_names(&self) -> Result<Vec<String>, BusError> {
        self.count("ListNames");
        let endpoints = self
            .endpoints
            .lock()
            .map_err(|_| BusError::Transport("mock bus poisoned".into()))?;
        let mut names = vec![BUS_DAEMON_NAME.to_string()];
        names.extend(endpoints.iter().map(|e| e.name.clone()));
        Ok(names)
    }

    fn connection_pid(&self, connection: &str) -> Result<u32, BusError> {
        self.count("GetConnectionUnixProcessID");
        if connection == BUS_DAEMON_NAME {
            return Ok(1);
        }
        self.with(connection, |e| e.pid).and_then(|pid| {
            pid.ok_or_else(|| {
                BusError::remote(
                    dbus_errors::NAME_HAS_NO_OWNER,
                    format!("Could not get PID of name '{}'", connection),
                )
            })
        })
    }

    fn introspect(&self, connection: &str, path: &str) -> Result<String, BusError> {
        self.count("Introspect");
        self.with(connection, |e| e.introspection.clone())?
            .ok_or_else(|| BusError::remote(UNKNOWN_OBJECT, format!("No such object path '{}'", path)))
    }

    fn get_version(&self, connection: &str, _path: &str) -> Result<String, BusError> {
        self.count("GetVersion");
        self.with(connection, |e| e.version.clone())?.ok_or_else(|| {
            BusError::remote(dbus_errors::UNKNOWN_METHOD, "No such method 'GetVersion'")
        })
    }

    fn get_state(
        &self,
        connection: &str,
        _path: &str,
        query: &[u8],
    ) -> Result<Vec<RawNode>, BusError> {
        self.count("GetState");
        let query = String::from_utf8_lossy(query).into_owned();
        self.with(connection, |e| e.states.get(&query).cloned().unwrap_or_default())
    }

    fn list_signals(
        &self,
        connection: &str,
        _path: &str,
        object_id: i64,
    ) -> Result<Vec<String>, BusError> {
        self.count("ListSignals");
        self.with(connection, |e| e.signals.get(&object_id).cloned().unwrap_or_default())
    }

    fn list_methods(
        &self,
        connection: &str,
        _path: &str,
        object_id: i64,
    ) -> Result<Vec<String>, BusError> {
        self.count("ListMethods");
        self.with(connection, |e| e.methods.get(&object_id).cloned().unwrap_or_default())
    }

    fn register_signal_interest(
        &self,
        connection: &str,
        _path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<(), BusError> {
        self.count("RegisterSignalInterest");
        self.with(connection, |e| {
            let key = (object_id, signal.to_string());
            if !e.interests.contains(&key) {
                e.interests.push(key);
            }
        })
    }

    fn get_signal_emissions(
        &self,
        connection: &str,
        _path: &str,
        object_id: i64,
        signal: &str,
    ) -> Result<Vec<Vec<WireValue>>, BusError> {
        self.count("GetSignalEmissions");
        self.with(connection, |e| {
            e.emissions
                .get(&(object_id, signal.to_string()))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn invoke_method(
        &self,
        connection: &str,
        _path: &str,
        object_id: i64,
        method: &str,
        args: &[WireValue],
    ) -> Result<(), BusError> {
        self.count("InvokeMethod");
        self.with(connection, |e| {
            e.invocations
                .push((object_id, method.to_string(), args.to_vec()))
        })
    }
}
