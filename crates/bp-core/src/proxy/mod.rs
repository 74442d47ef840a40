//! Proxy object model.
//!
//! - [`builder`]: two-phase handshake producing an [`ApplicationProxy`]
//! - [`node`]: lazily navigated tree of [`ProxyNode`]s
//! - [`registry`]: per-base proxy class cache
//! - [`capability`]: extension discovery from introspection documents
//! - [`qt`]: Qt signal/slot extension

pub mod application;
pub mod builder;
pub mod capability;
pub mod node;
pub mod qt;
pub mod registry;

pub use application::ApplicationProxy;
pub use builder::ProxyBuilder;
pub use capability::{Capability, CapabilitySet};
pub use node::{NoRefreshGuard, ProxyNode, TreeContext, TreeSnapshot};
pub use qt::{QtExtension, SignalWatcher};
pub use registry::{CustomProxyClass, EmulatorBase, ObjectClassRegistry, ProxyClass};
