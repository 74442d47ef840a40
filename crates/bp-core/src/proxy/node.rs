//! Proxy nodes: local mirrors of remote introspectable objects.
//!
//! A [`ProxyNode`] holds the last state fetched for one remote object plus
//! a shared [`TreeContext`] (backend, class registry, emulator base). Nodes
//! never hold references to their children or parent; every navigation
//! issues a fresh query and builds new nodes from the reply.

use super::capability::{Capability, CapabilitySet};
use super::qt::QtExtension;
use super::registry::{EmulatorBase, ObjectClassRegistry, ProxyClass};
use crate::address::BusAddress;
use crate::backend::Backend;
use crate::bus::{RawNode, WireValue};
use crate::query::{Filters, Query};
use crate::search::timeout::{poll_until, Deadline};
use crate::types::{NodeState, StateValue};
use bp_common::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Default budget for the `wait_*` family.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between `wait_*` polls.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// State shared by every node of one proxy tree.
///
/// The capability set is fixed when the root is built and applies to every
/// class resolved in the tree.
#[derive(Debug)]
pub struct TreeContext {
    backend: Backend,
    registry: Arc<ObjectClassRegistry>,
    base: EmulatorBase,
    capabilities: CapabilitySet,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl TreeContext {
    pub fn new(backend: Backend, registry: Arc<ObjectClassRegistry>, base: EmulatorBase) -> Self {
        TreeContext {
            backend,
            registry,
            base,
            capabilities: CapabilitySet::new(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_WAIT_INTERVAL,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ObjectClassRegistry> {
        &self.registry
    }

    pub fn base(&self) -> &EmulatorBase {
        &self.base
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn deadline(&self) -> Deadline {
        Deadline::new(self.wait_timeout, self.poll_interval)
    }
}

/// One remote object.
#[derive(Debug)]
pub struct ProxyNode {
    class: Arc<ProxyClass>,
    path: Vec<u8>,
    state: RefCell<NodeState>,
    tree: Arc<TreeContext>,
    auto_refresh: Cell<bool>,
}

impl ProxyNode {
    /// Build a node from one `(path, state)` reply entry.
    ///
    /// The path is normalized to valid UTF-8 so it can be used as a stable
    /// identifier and re-sent in queries.
    pub fn from_raw(tree: Arc<TreeContext>, raw: &RawNode) -> Result<ProxyNode> {
        let path = String::from_utf8_lossy(&raw.path).into_owned().into_bytes();
        let state = NodeState::decode(&raw.state)?;
        let class = tree
            .registry
            .resolve(&tree.base, &tree.capabilities, &path, &state)?;
        Ok(ProxyNode {
            class,
            path,
            state: RefCell::new(state),
            tree,
            auto_refresh: Cell::new(true),
        })
    }

    /// Run `query` and build a node for every object in the reply.
    ///
    /// Client-side filters are applied against the fetched snapshot.
    pub fn execute(tree: &Arc<TreeContext>, query: &Query) -> Result<Vec<ProxyNode>> {
        let data = tree.backend.execute_query_get_data(query)?;
        let mut nodes = data
            .iter()
            .map(|raw| ProxyNode::from_raw(Arc::clone(tree), raw))
            .collect::<Result<Vec<_>>>()?;

        if query.needs_client_side_filtering() {
            let filters = query.client_filters();
            let mut kept = Vec::with_capacity(nodes.len());
            for node in nodes {
                if node.passes_filters(filters)? {
                    kept.push(node);
                }
            }
            nodes = kept;
        }
        Ok(nodes)
    }

    pub fn id(&self) -> i64 {
        self.state.borrow().id
    }

    pub fn type_name(&self) -> &str {
        self.class.type_name()
    }

    /// Object path as bytes.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Object path as text.
    pub fn path_str(&self) -> String {
        String::from_utf8_lossy(&self.path).into_owned()
    }

    pub fn class(&self) -> &Arc<ProxyClass> {
        &self.class
    }

    pub fn tree(&self) -> &Arc<TreeContext> {
        &self.tree
    }

    pub fn address(&self) -> &BusAddress {
        self.tree.backend.address()
    }

    /// Query selecting exactly this object.
    pub fn query(&self) -> Result<Query> {
        Query::new_from_path_and_id(&self.path, self.id())
    }

    /// Current value of `name`.
    ///
    /// Refreshes from the application first unless automatic refreshing is
    /// suppressed. Unknown attributes are `None` and cost no round trip.
    pub fn attribute(&self, name: &str) -> Result<Option<StateValue>> {
        if !self.state.borrow().attributes.contains_key(name) {
            return Ok(None);
        }
        if self.auto_refresh.get() {
            self.refresh()?;
        }
        Ok(self.state.borrow().get(name).cloned())
    }

    /// All attributes, refreshed unless automatic refreshing is suppressed.
    pub fn attributes(&self) -> Result<IndexMap<String, StateValue>> {
        self.refresh_if_enabled()?;
        Ok(self.state.borrow().attributes.clone())
    }

    /// The last fetched state, without a round trip.
    pub fn state(&self) -> NodeState {
        self.state.borrow().clone()
    }

    /// Re-fetch this object's state.
    ///
    /// Fails with `StateNotFound` once the remote object is gone.
    pub fn refresh(&self) -> Result<()> {
        let data = self.tree.backend.execute_query_get_data(&self.query()?)?;
        let Some(raw) = data.first() else {
            return Err(self.not_found());
        };
        let state = NodeState::decode(&raw.state)?;
        self.state.replace(state);
        Ok(())
    }

    fn refresh_if_enabled(&self) -> Result<()> {
        if self.auto_refresh.get() {
            self.refresh()?;
        }
        Ok(())
    }

    /// Immediate children of any type.
    pub fn children(&self) -> Result<Vec<ProxyNode>> {
        self.refresh_if_enabled()?;
        let query = self.query()?.select_child("*", Filters::new())?;
        ProxyNode::execute(&self.tree, &query)
    }

    /// Immediate children named `type_name` matching `filters`.
    pub fn children_by_type(&self, type_name: &str, filters: Filters) -> Result<Vec<ProxyNode>> {
        self.refresh_if_enabled()?;
        let query = self.query()?.select_child(type_name, filters)?;
        ProxyNode::execute(&self.tree, &query)
    }

    /// The parent object. The root is its own parent.
    pub fn parent(&self) -> Result<ProxyNode> {
        let query = self.query()?.select_parent()?;
        ProxyNode::execute(&self.tree, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found())
    }

    /// Closest ancestor named `type_name` (any type when empty) that matches
    /// `filters`.
    pub fn parent_of_type(&self, type_name: &str, filters: &Filters) -> Result<ProxyNode> {
        let ancestors: Vec<&[u8]> = self
            .path
            .split(|b| *b == b'/')
            .filter(|n| !n.is_empty())
            .collect();
        let ancestors = &ancestors[..ancestors.len().saturating_sub(1)];
        let wanted = type_name.as_bytes();
        let missing = || Error::StateNotFound {
            type_name: if type_name.is_empty() { "*".into() } else { type_name.to_string() },
            id: self.id(),
        };
        if !type_name.is_empty() && !ancestors.contains(&wanted) {
            return Err(missing());
        }

        let mut query = self.query()?;
        for name in ancestors.iter().rev() {
            query = query.select_parent()?;
            if !type_name.is_empty() && *name != wanted {
                continue;
            }
            if let Some(parent) = ProxyNode::execute(&self.tree, &query)?.into_iter().next() {
                if parent.passes_filters(filters)? {
                    return Ok(parent);
                }
            }
        }
        Err(missing())
    }

    /// The root of the tree this node belongs to.
    pub fn root(&self) -> Result<ProxyNode> {
        ProxyNode::execute(&self.tree, &Query::pseudo_tree_root())?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidState("tree root query returned nothing".into()))
    }

    /// Every object in the tree with this node's type. Slow.
    pub fn all_instances(&self) -> Result<Vec<ProxyNode>> {
        let query = Query::whole_tree_search(self.type_name(), Filters::new())?;
        ProxyNode::execute(&self.tree, &query)
    }

    fn descendant_query(&self, type_name: &str, filters: Filters) -> Result<Query> {
        tracing::debug!(
            type_name,
            filters = ?filters,
            "selecting descendants of {}",
            self.path_str()
        );
        self.query()?.select_descendant(type_name, filters)
    }

    /// Descendants named `type_name` (`*` for any) matching `filters`.
    pub fn select_many(&self, type_name: &str, filters: Filters) -> Result<Vec<ProxyNode>> {
        let query = self.descendant_query(type_name, filters)?;
        ProxyNode::execute(&self.tree, &query)
    }

    /// The single descendant matching, `None` if there is none.
    pub fn select_single(&self, type_name: &str, filters: Filters) -> Result<Option<ProxyNode>> {
        let query = self.descendant_query(type_name, filters)?;
        let mut nodes = ProxyNode::execute(&self.tree, &query)?;
        match nodes.len() {
            0 => Ok(None),
            1 => Ok(nodes.pop()),
            count => Err(Error::AmbiguousResults {
                criteria: query.to_string(),
                count,
            }),
        }
    }

    /// Like [`select_single`](Self::select_single), polling until the object
    /// appears.
    pub fn wait_select_single(&self, type_name: &str, filters: Filters) -> Result<ProxyNode> {
        let deadline = self.tree.deadline();
        poll_until(&deadline, || self.select_single(type_name, filters.clone()))?
            .ok_or_else(|| timeout(&deadline, format!("a single {type_name} object")))
    }

    /// Poll until at least `count` descendants match.
    pub fn wait_select_many(
        &self,
        type_name: &str,
        filters: Filters,
        count: usize,
    ) -> Result<Vec<ProxyNode>> {
        let deadline = self.tree.deadline();
        poll_until(&deadline, || {
            let nodes = self.select_many(type_name, filters.clone())?;
            Ok((nodes.len() >= count).then_some(nodes))
        })?
        .ok_or_else(|| timeout(&deadline, format!("{count} {type_name} objects")))
    }

    /// Poll until attribute `name` equals `expected`.
    pub fn wait_for(&self, name: &str, expected: &WireValue) -> Result<()> {
        if !self.state.borrow().attributes.contains_key(name) {
            return Err(Error::InvalidState(format!(
                "object {} has no attribute '{}'",
                self.type_name(),
                name
            )));
        }
        let deadline = self.tree.deadline();
        poll_until(&deadline, || {
            self.refresh()?;
            let matched = self
                .state
                .borrow()
                .get(name)
                .is_some_and(|value| value.matches(expected));
            Ok(matched.then_some(()))
        })?
        .ok_or_else(|| timeout(&deadline, format!("{name} to become {expected:?}")))
    }

    /// Poll until the remote object no longer exists.
    pub fn wait_until_destroyed(&self) -> Result<()> {
        let deadline = self.tree.deadline();
        poll_until(&deadline, || match self.refresh() {
            Ok(()) => Ok(None),
            Err(Error::StateNotFound { .. }) => Ok(Some(())),
            Err(e) => Err(e),
        })?
        .ok_or_else(|| timeout(&deadline, format!("{} to be destroyed", self.type_name())))
    }

    /// Suppress automatic refreshing until the guard is dropped.
    pub fn no_automatic_refreshing(&self) -> NoRefreshGuard<'_> {
        let previous = self.auto_refresh.replace(false);
        NoRefreshGuard {
            node: self,
            previous,
        }
    }

    fn passes_filters(&self, filters: &Filters) -> Result<bool> {
        let _frozen = self.no_automatic_refreshing();
        for (name, expected) in filters {
            match self.attribute(name)? {
                Some(value) if value.matches(expected) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.class.has_capability(capability)
    }

    /// Qt signal/slot access, when the application advertised it.
    pub fn qt(&self) -> Option<QtExtension<'_>> {
        self.has_capability(Capability::Qt)
            .then(|| QtExtension::new(self))
    }

    /// Write this node and its descendants, `max_depth` levels deep.
    ///
    /// Objects that vanish mid-walk are reported inline.
    pub fn print_tree(&self, out: &mut dyn Write, max_depth: Option<usize>) -> Result<()> {
        self.print_tree_at(out, max_depth, 0)
    }

    fn print_tree_at(&self, out: &mut dyn Write, max_depth: Option<usize>, depth: usize) -> Result<()> {
        let indent = "  ".repeat(depth);
        if depth > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{}== {} ==", indent, self.path_str())?;

        let listing = if depth == 0 {
            self.attributes()
        } else {
            Ok(self.state.borrow().attributes.clone())
        };
        let result = listing.and_then(|attributes| {
            for (name, value) in &attributes {
                writeln!(out, "{}{}: {}", indent, name, value)?;
            }
            if max_depth.map_or(true, |max| depth < max) {
                for child in self.children()? {
                    child.print_tree_at(out, max_depth, depth + 1)?;
                }
            }
            Ok(())
        });
        match result {
            Err(e @ Error::StateNotFound { .. }) => {
                writeln!(out, "{}Error: {}", indent, e)?;
                Ok(())
            }
            other => other,
        }
    }

    /// Serializable copy of this node and its descendants.
    pub fn snapshot(&self, max_depth: Option<usize>) -> Result<TreeSnapshot> {
        self.snapshot_at(max_depth, 0)
    }

    fn snapshot_at(&self, max_depth: Option<usize>, depth: usize) -> Result<TreeSnapshot> {
        let mut children = Vec::new();
        if max_depth.map_or(true, |max| depth < max) {
            for child in self.children()? {
                children.push(child.snapshot_at(max_depth, depth + 1)?);
            }
        }
        let state = self.state.borrow();
        Ok(TreeSnapshot {
            path: self.path_str(),
            type_name: self.type_name().to_string(),
            id: state.id,
            attributes: state.attributes.clone(),
            children,
        })
    }

    fn not_found(&self) -> Error {
        Error::StateNotFound {
            type_name: self.type_name().to_string(),
            id: self.id(),
        }
    }
}

fn timeout(deadline: &Deadline, what: String) -> Error {
    Error::WaitTimeout {
        what,
        timeout_ms: deadline.timeout().as_millis() as u64,
    }
}

impl PartialEq for ProxyNode {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && *self.state.borrow() == *other.state.borrow()
    }
}

impl fmt::Display for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, id={})", self.type_name(), self.path_str(), self.id())
    }
}

/// Restores automatic refreshing on drop.
#[must_use = "refreshing resumes as soon as the guard is dropped"]
pub struct NoRefreshGuard<'a> {
    node: &'a ProxyNode,
    previous: bool,
}

impl Drop for NoRefreshGuard<'_> {
    fn drop(&mut self) {
        self.node.auto_refresh.set(self.previous);
    }
}

/// A proxy subtree rendered for output.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub path: String,
    pub type_name: String,
    pub id: i64,
    pub attributes: IndexMap<String, StateValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeSnapshot>,
}
