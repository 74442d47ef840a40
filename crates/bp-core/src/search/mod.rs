//! Connection discovery.
//!
//! [`ConnectionSearch::find`] polls the bus until the filter chain accepts
//! at least one connection, then narrows the survivors to a single
//! connection name:
//!
//! 1. Every pass starts with a fresh child-pid cache and, when a process
//!    handle is being watched, fails fast if that process has exited.
//! 2. Accepted connections are deduplicated by owning pid, first seen wins.
//! 3. With a pid criterion, a connection owned by exactly that pid beats
//!    connections owned by its children.
//! 4. Zero survivors after the timeout is `NoResults`; more than one is
//!    `AmbiguousResults`.

pub mod criteria;
pub mod filters;
pub mod timeout;

pub use criteria::{SearchCriteria, SearchKey};
pub use filters::{
    default_lookup, Candidate, Filter, FilterChain, FilterContext, FilterLookup,
};
pub use timeout::{poll_until, Deadline};

use crate::address::{BusAddress, VersionCheckCache};
use crate::bus::Bus;
use crate::log_event;
use crate::logging::{event_names, generate_run_id, get_host_id, LogContext, Stage};
use crate::process::{MonitoredProcess, PidResolver, ProcessTable};
use crate::proxy::{ApplicationProxy, ProxyBuilder};
use bp_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Overall search budget unless configured otherwise.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between search passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Discovers connections on one bus.
#[derive(Debug, Clone)]
pub struct ConnectionSearch {
    bus: Arc<dyn Bus>,
    table: Arc<dyn ProcessTable>,
    versions: Arc<VersionCheckCache>,
    lookup: FilterLookup,
    timeout: Duration,
    poll_interval: Duration,
    own_pid: u32,
    log: LogContext,
}

impl ConnectionSearch {
    pub fn new(
        bus: Arc<dyn Bus>,
        table: Arc<dyn ProcessTable>,
        versions: Arc<VersionCheckCache>,
    ) -> Self {
        ConnectionSearch {
            bus,
            table,
            versions,
            lookup: default_lookup(),
            timeout: DEFAULT_SEARCH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            own_pid: std::process::id(),
            log: LogContext::new(generate_run_id(), get_host_id()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pretend to be another process when excluding our own connections.
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    /// Replace the key-to-filter table.
    pub fn with_lookup(mut self, lookup: FilterLookup) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn versions(&self) -> &Arc<VersionCheckCache> {
        &self.versions
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Find the single connection matching `criteria`.
    ///
    /// When `process` is given it is polled on every pass; an exited process
    /// ends the search with `ProcessExited` instead of waiting out the
    /// timeout.
    pub fn find(
        &self,
        criteria: &SearchCriteria,
        mut process: Option<&mut dyn MonitoredProcess>,
    ) -> Result<String> {
        let chain = FilterChain::with_lookup(criteria, &self.lookup)?;
        let rendered = criteria.to_string();
        log_event!(
            self.log,
            INFO,
            event_names::SEARCH_STARTED,
            Stage::Search,
            "searching for connection",
            criteria = %rendered,
            bus = %self.bus.selector(),
            filters = ?chain.names()
        );

        let resolver = PidResolver::new(self.table.as_ref());
        let ctx = FilterContext {
            resolver: &resolver,
            versions: &self.versions,
            own_pid: self.own_pid,
        };
        let deadline = Deadline::new(self.timeout, self.poll_interval);
        let mut pass = 0u32;

        let found = poll_until(&deadline, || {
            pass += 1;
            resolver.invalidate();

            if let Some(process) = process.as_deref_mut() {
                if let Some(exit_code) = process.try_exit_code() {
                    log_event!(
                        self.log,
                        WARN,
                        event_names::SEARCH_PROCESS_EXITED,
                        Stage::Search,
                        "watched process exited during search",
                        pid = process.pid(),
                        exit_code
                    );
                    return Err(Error::ProcessExited { exit_code });
                }
            }

            let matches = self.accepted(&chain, criteria, &ctx)?;
            log_event!(
                self.log,
                DEBUG,
                event_names::SEARCH_PASS,
                Stage::Search,
                "search pass complete",
                pass,
                matches = matches.len()
            );
            Ok((!matches.is_empty()).then_some(matches))
        })?
        .unwrap_or_default();

        let survivors = match criteria.pid() {
            Some(pid) => prefer_parent(pid, found),
            None => found,
        };

        match survivors.as_slice() {
            [] => {
                log_event!(
                    self.log,
                    INFO,
                    event_names::SEARCH_NO_RESULTS,
                    Stage::Search,
                    "search returned no results",
                    criteria = %rendered,
                    passes = pass
                );
                Err(Error::NoResults { criteria: rendered })
            }
            [(connection, pid)] => {
                log_event!(
                    self.log,
                    INFO,
                    event_names::SEARCH_FINISHED,
                    Stage::Search,
                    "connection found",
                    connection = %connection,
                    pid = *pid,
                    passes = pass
                );
                Ok(connection.clone())
            }
            many => {
                log_event!(
                    self.log,
                    INFO,
                    event_names::SEARCH_AMBIGUOUS,
                    Stage::Search,
                    "search returned multiple results",
                    criteria = %rendered,
                    connections = ?many.iter().map(|(c, _)| c.as_str()).collect::<Vec<_>>()
                );
                Err(Error::AmbiguousResults {
                    criteria: rendered,
                    count: many.len(),
                })
            }
        }
    }

    /// Every connection exposing the introspection protocol at
    /// `object_path`, deduplicated by owner. Single pass, no waiting.
    pub fn find_all(&self, object_path: &str) -> Result<Vec<(String, u32)>> {
        let criteria = SearchCriteria::new().with_object_path(object_path);
        let chain = FilterChain::with_lookup(&criteria, &self.lookup)?;
        let resolver = PidResolver::new(self.table.as_ref());
        let ctx = FilterContext {
            resolver: &resolver,
            versions: &self.versions,
            own_pid: self.own_pid,
        };
        self.accepted(&chain, &criteria, &ctx)
    }

    /// Find the application described by `criteria` and build its proxy.
    ///
    /// `process` may stand in for the pid criterion; when both are given
    /// they must agree. The returned proxy tracks the process handle.
    pub fn get_proxy_object_for_existing_process(
        &self,
        criteria: SearchCriteria,
        mut process: Option<Box<dyn MonitoredProcess>>,
        builder: &ProxyBuilder,
    ) -> Result<ApplicationProxy> {
        let mut criteria = criteria;
        if let Some(pid) = self.reconcile_pid(criteria.pid(), process.as_deref())? {
            criteria.set_pid(pid);
        }

        let connection = match process.as_mut() {
            Some(process) => self.find(&criteria, Some(&mut **process))?,
            None => self.find(&criteria, None)?,
        };
        let address = BusAddress::new(
            Arc::clone(&self.bus),
            connection,
            criteria.object_path(),
            Arc::clone(&self.versions),
        );

        let mut app = builder.build(&address)?;
        if let Some(process) = process {
            app.set_process(process);
        }
        Ok(app)
    }

    /// Resolve `name` to a single running process and build its proxy.
    pub fn get_proxy_object_for_existing_process_by_name(
        &self,
        name: &str,
        builder: &ProxyBuilder,
    ) -> Result<ApplicationProxy> {
        let pid = self.pid_for_process_name(name)?;
        self.get_proxy_object_for_existing_process(
            SearchCriteria::new().with_pid(pid),
            None,
            builder,
        )
    }

    /// The single pid whose command name is `name`.
    pub fn pid_for_process_name(&self, name: &str) -> Result<u32> {
        match self.table.pids_named(name).as_slice() {
            [] => Err(Error::ProcessNameNotFound {
                name: name.to_string(),
            }),
            [pid] => Ok(*pid),
            many => Err(Error::AmbiguousResults {
                criteria: format!("process name = '{}'", name),
                count: many.len(),
            }),
        }
    }

    fn reconcile_pid(
        &self,
        pid: Option<u32>,
        process: Option<&dyn MonitoredProcess>,
    ) -> Result<Option<u32>> {
        let pid = match (pid, process) {
            (Some(pid), Some(process)) if pid != process.pid() => {
                return Err(Error::ProcessMismatch {
                    pid,
                    process_pid: process.pid(),
                })
            }
            (None, Some(process)) => Some(process.pid()),
            (pid, _) => pid,
        };

        if let Some(pid) = pid {
            if !self.table.exists(pid) {
                return Err(Error::ProcessNotFound { pid });
            }
        }
        Ok(pid)
    }

    /// One pass: list, filter, dedupe by owner.
    fn accepted(
        &self,
        chain: &FilterChain,
        criteria: &SearchCriteria,
        ctx: &FilterContext<'_>,
    ) -> Result<Vec<(String, u32)>> {
        let names = self.bus.list_names()?;
        let mut accepted: Vec<(String, u32)> = Vec::new();
        for name in &names {
            let candidate = Candidate {
                bus: &self.bus,
                connection: name,
            };
            if !chain.matches(candidate, criteria, ctx) {
                continue;
            }
            // Filters already resolved the owner; a connection that vanished
            // since then is dropped.
            let Ok(pid) = ctx.resolver.connection_pid(self.bus.as_ref(), name) else {
                continue;
            };
            if !accepted.iter().any(|(_, seen)| *seen == pid) {
                accepted.push((name.clone(), pid));
            }
        }
        Ok(accepted)
    }
}

/// A connection owned by `pid` itself wins over connections owned by its
/// descendants. Without one, all candidates survive.
fn prefer_parent(pid: u32, candidates: Vec<(String, u32)>) -> Vec<(String, u32)> {
    match candidates.iter().position(|(_, owner)| *owner == pid) {
        Some(index) => {
            tracing::info!(pid, "found the parent pid, ignoring any others");
            vec![candidates[index].clone()]
        }
        None => candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_bus::{MockBus, MockEndpoint};
    use crate::mock_process::{MockProcess, MockProcessTable};
    use crate::proxy::ObjectClassRegistry;

    fn search(bus: MockBus, table: MockProcessTable) -> ConnectionSearch {
        ConnectionSearch::new(
            Arc::new(bus),
            Arc::new(table),
            Arc::new(VersionCheckCache::new()),
        )
        .with_timeout(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(5))
        .with_own_pid(999)
    }

    #[test]
    fn finds_single_connection_by_name() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100))
            .with_endpoint(MockEndpoint::new(":1.6", 101));
        let found = search(bus, MockProcessTable::new())
            .find(&SearchCriteria::new().with_connection_name(":1.6"), None)
            .unwrap();
        assert_eq!(found, ":1.6");
    }

    #[test]
    fn duplicate_connections_of_one_process_collapse() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100))
            .with_endpoint(MockEndpoint::new("com.example.Calc", 100));
        let found = search(bus, MockProcessTable::new().with_process(100, 1, "calc"))
            .find(&SearchCriteria::new().with_pid(100), None)
            .unwrap();
        assert_eq!(found, ":1.5");
    }

    #[test]
    fn parent_pid_beats_children() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 200))
            .with_endpoint(MockEndpoint::new(":1.6", 100));
        let table = MockProcessTable::new()
            .with_process(100, 1, "launcher")
            .with_process(200, 100, "calc");
        let found = search(bus, table)
            .find(&SearchCriteria::new().with_pid(100), None)
            .unwrap();
        assert_eq!(found, ":1.6");
    }

    #[test]
    fn sibling_children_are_ambiguous() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 200))
            .with_endpoint(MockEndpoint::new(":1.6", 300));
        let table = MockProcessTable::new()
            .with_process(100, 1, "launcher")
            .with_process(200, 100, "calc")
            .with_process(300, 100, "calc");
        let result = search(bus, table).find(&SearchCriteria::new().with_pid(100), None);
        assert!(matches!(result, Err(Error::AmbiguousResults { count: 2, .. })));
    }

    #[test]
    fn no_results_renders_criteria() {
        let bus = MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100));
        let result = search(bus, MockProcessTable::new())
            .find(&SearchCriteria::new().with_application_name("calc"), None);
        match result {
            Err(Error::NoResults { criteria }) => {
                assert!(criteria.starts_with("application name = 'calc'"));
            }
            other => panic!("expected NoResults, got {other:?}"),
        }
    }

    #[test]
    fn exited_process_fails_fast() {
        let bus = MockBus::new();
        let mut process = MockProcess::exited(100, 3);
        let result = search(bus, MockProcessTable::new())
            .with_timeout(Duration::from_secs(30))
            .find(&SearchCriteria::new(), Some(&mut process));
        assert!(matches!(result, Err(Error::ProcessExited { exit_code: 3 })));
    }

    #[test]
    fn our_own_connections_never_match() {
        let bus = MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 999));
        let result = search(bus, MockProcessTable::new()).find(&SearchCriteria::new(), None);
        assert!(matches!(result, Err(Error::NoResults { .. })));
    }

    #[test]
    fn find_all_lists_introspectable_connections() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100))
            .with_endpoint(MockEndpoint::plain(":1.6", 101))
            .with_endpoint(MockEndpoint::new(":1.7", 102));
        let found = search(bus, MockProcessTable::new())
            .find_all(crate::constants::AUTOPILOT_PATH)
            .unwrap();
        assert_eq!(
            found,
            vec![(":1.5".to_string(), 100), (":1.7".to_string(), 102)]
        );
    }

    #[test]
    fn mismatched_pid_and_process_is_rejected() {
        let builder = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()));
        let result = search(MockBus::new(), MockProcessTable::new())
            .get_proxy_object_for_existing_process(
                SearchCriteria::new().with_pid(5),
                Some(Box::new(MockProcess::running(6))),
                &builder,
            );
        assert!(matches!(
            result,
            Err(Error::ProcessMismatch { pid: 5, process_pid: 6 })
        ));
    }

    #[test]
    fn missing_pid_is_process_not_found() {
        let builder = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()));
        let result = search(MockBus::new(), MockProcessTable::new())
            .get_proxy_object_for_existing_process(SearchCriteria::new().with_pid(5), None, &builder);
        assert!(matches!(result, Err(Error::ProcessNotFound { pid: 5 })));
    }

    #[test]
    fn process_handle_supplies_pid_and_is_tracked() {
        let bus = MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100).application("calc"))
            .with_endpoint(MockEndpoint::new(":1.6", 101).application("calc"));
        let table = MockProcessTable::new().with_process(101, 1, "calc");
        let handle = MockProcess::running(101);
        let builder = ProxyBuilder::new(Arc::new(ObjectClassRegistry::new()));

        let app = search(bus, table)
            .get_proxy_object_for_existing_process(
                SearchCriteria::new(),
                Some(Box::new(handle.clone())),
                &builder,
            )
            .unwrap();
        assert_eq!(app.address().connection(), ":1.6");
        assert_eq!(app.process_pid().unwrap(), 101);
    }

    #[test]
    fn process_name_must_be_unique() {
        let table = MockProcessTable::new()
            .with_process(100, 1, "calc")
            .with_process(101, 1, "calc")
            .with_process(102, 1, "editor");
        let search = search(MockBus::new(), table);
        assert_eq!(search.pid_for_process_name("editor").unwrap(), 102);
        assert!(matches!(
            search.pid_for_process_name("calc"),
            Err(Error::AmbiguousResults { count: 2, .. })
        ));
        assert!(matches!(
            search.pid_for_process_name("viewer"),
            Err(Error::ProcessNameNotFound { .. })
        ));
    }
}
