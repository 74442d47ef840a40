//! Root proxy construction.
//!
//! Building a proxy is a two-phase handshake against one [`BusAddress`]:
//!
//! 1. Introspect the endpoint and discover which capability extensions it
//!    advertises. The base introspection interface is mandatory.
//! 2. Fetch the root object's state and resolve its class.
//!
//! Phase 2 is only attempted after phase 1 succeeded, in both the blocking
//! and the callback flavour.

use super::application::ApplicationProxy;
use super::capability::{self, CapabilitySet};
use super::node::{ProxyNode, TreeContext, DEFAULT_WAIT_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use super::registry::{EmulatorBase, ObjectClassRegistry};
use crate::address::BusAddress;
use crate::backend::{Backend, DEFAULT_LARGE_REPLY_WARNING};
use crate::logging::{event_names, Stage};
use crate::query::Query;
use bp_common::{Error, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Builds [`ApplicationProxy`] roots.
#[derive(Debug, Clone)]
pub struct ProxyBuilder {
    registry: Arc<ObjectClassRegistry>,
    base: EmulatorBase,
    large_reply_warning: usize,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ProxyBuilder {
    pub fn new(registry: Arc<ObjectClassRegistry>) -> Self {
        ProxyBuilder {
            registry,
            base: EmulatorBase::default(),
            large_reply_warning: DEFAULT_LARGE_REPLY_WARNING,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_WAIT_INTERVAL,
        }
    }

    /// Use custom proxy classes from `base`.
    pub fn with_base(mut self, base: EmulatorBase) -> Self {
        self.base = base;
        self
    }

    pub fn with_large_reply_warning(mut self, threshold: usize) -> Self {
        self.large_reply_warning = threshold;
        self
    }

    pub fn with_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn base(&self) -> &EmulatorBase {
        &self.base
    }

    /// Run both handshake phases and return the root proxy.
    pub fn build(&self, address: &BusAddress) -> Result<ApplicationProxy> {
        let capabilities = self.discover_capabilities(address)?;
        self.fetch_root(address, capabilities)
    }

    /// Run the handshake on a worker thread.
    ///
    /// Exactly one of `on_reply` and `on_error` is called, from the worker.
    pub fn build_async<R, E>(
        &self,
        address: &BusAddress,
        on_reply: R,
        on_error: E,
    ) -> Result<JoinHandle<()>>
    where
        R: FnOnce(ApplicationProxy) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let builder = self.clone();
        let address = address.clone();
        let handle = std::thread::Builder::new()
            .name("busprobe-handshake".to_string())
            .spawn(move || {
                let outcome = builder
                    .discover_capabilities(&address)
                    .and_then(|capabilities| builder.fetch_root(&address, capabilities));
                match outcome {
                    Ok(app) => on_reply(app),
                    Err(e) => on_error(e),
                }
            })?;
        Ok(handle)
    }

    /// Phase 1: introspect and discover capability extensions.
    pub fn discover_capabilities(&self, address: &BusAddress) -> Result<CapabilitySet> {
        let xml = address.introspect()?;
        let capabilities = capability::discover(&xml).ok_or_else(|| Error::CapabilityDiscovery {
            address: address.to_string(),
        })?;

        tracing::debug!(
            target: event_names::HANDSHAKE_CAPABILITIES,
            stage = %Stage::Handshake,
            address = %address,
            capabilities = ?capabilities,
            interfaces = ?capability::interfaces_in(&xml),
            "capability introspection complete"
        );
        Ok(capabilities)
    }

    /// Phase 2: fetch the root state and build the root proxy.
    ///
    /// `capabilities` come from phase 1 and are fixed for the whole tree.
    pub fn fetch_root(
        &self,
        address: &BusAddress,
        capabilities: CapabilitySet,
    ) -> Result<ApplicationProxy> {
        let backend =
            Backend::new(address.clone()).with_large_reply_warning(self.large_reply_warning);
        let tree = Arc::new(
            TreeContext::new(backend, Arc::clone(&self.registry), self.base.clone())
                .with_capabilities(capabilities)
                .with_wait(self.wait_timeout, self.poll_interval),
        );

        let root = ProxyNode::execute(&tree, &Query::pseudo_tree_root())?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::InvalidState(format!("{} returned no root object", address))
            })?;

        tracing::debug!(
            target: event_names::HANDSHAKE_STATE,
            stage = %Stage::Handshake,
            address = %address,
            type_name = %root.type_name(),
            id = root.id(),
            "root state fetched"
        );
        Ok(ApplicationProxy::new(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::VersionCheckCache;
    use crate::constants::{
        AP_INTROSPECTION_IFACE, AUTOPILOT_PATH, DBUS_INTROSPECTION_IFACE,
    };
    use crate::mock_bus::{introspection_xml, MockBus, MockEndpoint};
    use crate::proxy::capability::Capability;
    use crate::proxy::registry::CustomProxyClass;
    use std::sync::mpsc;

    fn address(bus: &Arc<MockBus>) -> BusAddress {
        BusAddress::new(
            bus.clone(),
            ":1.5",
            AUTOPILOT_PATH,
            Arc::new(VersionCheckCache::new()),
        )
    }

    #[test]
    fn builds_qt_root() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100).qt().application("calc")),
        );
        let app = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()))
            .build(&address(&bus))
            .unwrap();
        assert_eq!(app.type_name(), "calc");
        assert_eq!(app.path(), b"/calc");
        assert!(app.has_capability(Capability::Qt));
        assert!(app.qt().is_some());
    }

    #[test]
    fn plain_endpoint_has_no_extensions() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100).application("calc")),
        );
        let app = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()))
            .build(&address(&bus))
            .unwrap();
        assert!(!app.has_capability(Capability::Qt));
    }

    #[test]
    fn one_builder_keeps_each_roots_capabilities() {
        let bus = Arc::new(
            MockBus::new()
                .with_endpoint(MockEndpoint::new(":1.5", 100).qt().application("calc"))
                .with_endpoint(MockEndpoint::new(":1.6", 101).application("calc")),
        );
        let builder = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()));
        let qt_app = builder.build(&address(&bus)).unwrap();
        let plain_address = BusAddress::new(
            bus.clone(),
            ":1.6",
            AUTOPILOT_PATH,
            Arc::new(VersionCheckCache::new()),
        );
        let plain_app = builder.build(&plain_address).unwrap();

        assert!(qt_app.has_capability(Capability::Qt));
        assert!(!plain_app.has_capability(Capability::Qt));
        assert_eq!(qt_app.tree().capabilities().len(), 1);
        assert!(plain_app.tree().capabilities().is_empty());
    }

    #[test]
    fn extra_interfaces_are_ignored() {
        let xml = introspection_xml(&[
            DBUS_INTROSPECTION_IFACE,
            AP_INTROSPECTION_IFACE,
            "com.canonical.Autopilot.Gtk",
        ]);
        let bus = Arc::new(MockBus::new().with_endpoint(
            MockEndpoint::new(":1.5", 100).introspection(&xml).application("calc"),
        ));
        let builder = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()));
        assert!(builder.discover_capabilities(&address(&bus)).unwrap().is_empty());
    }

    #[test]
    fn missing_base_interface_fails_phase_one() {
        let bus = Arc::new(MockBus::new().with_endpoint(
            MockEndpoint::new(":1.5", 100)
                .introspection(&introspection_xml(&[DBUS_INTROSPECTION_IFACE]))
                .application("calc"),
        ));
        let result = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new())).build(&address(&bus));
        assert!(matches!(result, Err(Error::CapabilityDiscovery { .. })));
        assert_eq!(bus.calls("GetState"), 0);
    }

    #[test]
    fn version_mismatch_is_a_hard_failure() {
        let bus = Arc::new(MockBus::new().with_endpoint(
            MockEndpoint::new(":1.5", 100).version("1.3").application("calc"),
        ));
        let result = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new())).build(&address(&bus));
        assert!(matches!(result, Err(Error::ProtocolMismatch { .. })));
        assert_eq!(bus.calls("GetState"), 0);
    }

    #[test]
    fn empty_root_reply_is_invalid_state() {
        let bus = Arc::new(MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100)));
        let result = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new())).build(&address(&bus));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[derive(Debug)]
    struct Calculator;

    impl CustomProxyClass for Calculator {
        fn type_name(&self) -> &str {
            "calc"
        }
    }

    #[test]
    fn custom_base_classes_claim_root() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100).application("calc")),
        );
        let app = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()))
            .with_base(EmulatorBase::new("CalcEmulator").with_class(Calculator))
            .build(&address(&bus))
            .unwrap();
        assert!(!app.class().is_generated());
    }

    #[test]
    fn async_build_delivers_reply() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100).qt().application("calc")),
        );
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        let handle = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()))
            .build_async(
                &address(&bus),
                move |app| {
                    let _ = tx.send(Ok(app.type_name().to_string()));
                },
                move |e| {
                    let _ = err_tx.send(Err(e.to_string()));
                },
            )
            .unwrap();
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), Ok("calc".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn async_phase_one_failure_skips_phase_two() {
        let bus = Arc::new(MockBus::new().with_endpoint(
            MockEndpoint::new(":1.5", 100)
                .without_introspection()
                .application("calc"),
        ));
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        let handle = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()))
            .build_async(
                &address(&bus),
                move |_| {
                    let _ = tx.send("reply");
                },
                move |_| {
                    let _ = err_tx.send("error");
                },
            )
            .unwrap();
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), "error");
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.calls("GetState"), 0);
        assert_eq!(bus.calls("GetVersion"), 0);
    }
}
