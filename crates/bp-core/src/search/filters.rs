//! Connection filters.
//!
//! A [`FilterChain`] holds the two mandatory filters plus one filter per
//! search key, sorted by descending priority so cheap, selective checks
//! run first. Priority only changes cost, never the outcome: a candidate
//! matches when every filter accepts it.
//!
//! Filters that need a bus round trip treat any fault as "no match"; a
//! connection that cannot be reached cannot be the one we want.

use super::criteria::{SearchCriteria, SearchKey};
use crate::address::{BusAddress, VersionCheckCache};
use crate::bus::Bus;
use crate::constants::{AP_INTROSPECTION_IFACE, BUS_DAEMON_NAME};
use crate::logging::{event_names, Stage};
use crate::process::PidResolver;
use crate::proxy::capability;
use crate::query::classname_from_path;
use bp_common::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A connection under consideration.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub bus: &'a Arc<dyn Bus>,
    pub connection: &'a str,
}

/// Per-search services available to filters.
#[derive(Debug)]
pub struct FilterContext<'a> {
    pub resolver: &'a PidResolver<'a>,
    pub versions: &'a Arc<VersionCheckCache>,
    /// Pid of this process; its own connections never match.
    pub own_pid: u32,
}

/// One accept/reject predicate over candidates.
pub trait Filter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn matches(
        &self,
        candidate: Candidate<'_>,
        criteria: &SearchCriteria,
        ctx: &FilterContext<'_>,
    ) -> bool;
}

/// Rejects the bus daemon itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotBusDaemon;

impl Filter for NotBusDaemon {
    fn name(&self) -> &'static str {
        "not_bus_daemon"
    }

    fn priority(&self) -> i32 {
        13
    }

    fn matches(&self, candidate: Candidate<'_>, _: &SearchCriteria, _: &FilterContext<'_>) -> bool {
        candidate.connection != BUS_DAEMON_NAME
    }
}

/// Rejects connections owned by this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotOurConnection;

impl Filter for NotOurConnection {
    fn name(&self) -> &'static str {
        "not_our_connection"
    }

    fn priority(&self) -> i32 {
        12
    }

    fn matches(&self, candidate: Candidate<'_>, _: &SearchCriteria, ctx: &FilterContext<'_>) -> bool {
        match ctx
            .resolver
            .connection_pid(candidate.bus.as_ref(), candidate.connection)
        {
            Ok(pid) => pid != ctx.own_pid,
            Err(_) => false,
        }
    }
}

/// Exact connection name.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasName;

impl Filter for HasName {
    fn name(&self) -> &'static str {
        "has_name"
    }

    fn priority(&self) -> i32 {
        11
    }

    fn matches(&self, candidate: Candidate<'_>, criteria: &SearchCriteria, _: &FilterContext<'_>) -> bool {
        criteria.connection_name() == Some(candidate.connection)
    }
}

/// Connection owned by the requested pid or any of its descendants.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasPid;

impl Filter for HasPid {
    fn name(&self) -> &'static str {
        "has_pid"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn matches(&self, candidate: Candidate<'_>, criteria: &SearchCriteria, ctx: &FilterContext<'_>) -> bool {
        let Some(pid) = criteria.pid() else {
            return false;
        };
        let owner = match ctx
            .resolver
            .connection_pid(candidate.bus.as_ref(), candidate.connection)
        {
            Ok(owner) => owner,
            Err(e) => {
                tracing::info!(
                    connection = candidate.connection,
                    error = %e,
                    "could not resolve connection pid"
                );
                return false;
            }
        };
        owner == pid || ctx.resolver.descendants(pid).contains(&owner)
    }
}

/// Connection exposes the base introspection interface at the object path.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasIntrospectionPath;

impl Filter for HasIntrospectionPath {
    fn name(&self) -> &'static str {
        "has_introspection_path"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn matches(&self, candidate: Candidate<'_>, criteria: &SearchCriteria, _: &FilterContext<'_>) -> bool {
        match candidate
            .bus
            .introspect(candidate.connection, criteria.object_path())
        {
            Ok(xml) => capability::advertises(&xml, AP_INTROSPECTION_IFACE),
            Err(_) => false,
        }
    }
}

/// The application's root object carries the requested name.
///
/// Needs a state query, so it runs last. An endpoint speaking another wire
/// protocol version simply does not match.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasApplicationName;

impl Filter for HasApplicationName {
    fn name(&self) -> &'static str {
        "has_application_name"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn matches(&self, candidate: Candidate<'_>, criteria: &SearchCriteria, ctx: &FilterContext<'_>) -> bool {
        let Some(wanted) = criteria.application_name() else {
            return false;
        };
        let address = BusAddress::new(
            Arc::clone(candidate.bus),
            candidate.connection,
            criteria.object_path(),
            Arc::clone(ctx.versions),
        );
        match address.get_state(b"/") {
            Ok(nodes) => nodes
                .first()
                .is_some_and(|root| classname_from_path(&root.path) == wanted),
            Err(e) => {
                tracing::debug!(
                    connection = candidate.connection,
                    error = %e,
                    "application name lookup failed"
                );
                false
            }
        }
    }
}

/// Maps search keys to the filter that checks them.
pub type FilterLookup = BTreeMap<SearchKey, Arc<dyn Filter>>;

/// The standard key-to-filter table.
pub fn default_lookup() -> FilterLookup {
    let mut lookup: FilterLookup = BTreeMap::new();
    lookup.insert(SearchKey::Pid, Arc::new(HasPid));
    lookup.insert(SearchKey::ConnectionName, Arc::new(HasName));
    lookup.insert(SearchKey::ApplicationName, Arc::new(HasApplicationName));
    lookup.insert(SearchKey::ObjectPath, Arc::new(HasIntrospectionPath));
    lookup
}

fn mandatory_filters() -> Vec<Arc<dyn Filter>> {
    vec![Arc::new(NotOurConnection), Arc::new(NotBusDaemon)]
}

/// Priority-ordered filters for one search.
#[derive(Debug, Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn from_criteria(criteria: &SearchCriteria) -> Result<FilterChain> {
        Self::with_lookup(criteria, &default_lookup())
    }

    /// Build a chain using a custom key-to-filter table.
    pub fn with_lookup(criteria: &SearchCriteria, lookup: &FilterLookup) -> Result<FilterChain> {
        let mut filters = mandatory_filters();
        for key in criteria.keys() {
            let filter = lookup.get(&key).ok_or_else(|| {
                Error::Config(format!(
                    "search parameter {} doesn't have a corresponding filter",
                    key
                ))
            })?;
            if !filters.iter().any(|f| f.name() == filter.name()) {
                filters.push(Arc::clone(filter));
            }
        }
        filters.sort_by_key(|f| std::cmp::Reverse(f.priority()));
        Ok(FilterChain { filters })
    }

    /// Filter names in evaluation order.
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether every filter accepts `candidate`. Stops at the first reject.
    pub fn matches(
        &self,
        candidate: Candidate<'_>,
        criteria: &SearchCriteria,
        ctx: &FilterContext<'_>,
    ) -> bool {
        for filter in &self.filters {
            if !filter.matches(candidate, criteria, ctx) {
                tracing::debug!(
                    target: event_names::FILTER_REJECTED,
                    stage = %Stage::Filter,
                    filter = filter.name(),
                    connection = candidate.connection,
                    "candidate rejected"
                );
                return false;
            }
        }
        true
    }
}
