//! End-to-end connection search scenarios against the in-memory bus.
//!
//! Run with `--features test-utils`.

use bp_common::Error;
use bp_core::bus::Bus;
use bp_core::config::ProbeConfig;
use bp_core::mock_bus::{MockBus, MockEndpoint};
use bp_core::mock_process::{MockProcess, MockProcessTable};
use bp_core::search::{default_lookup, Candidate, Filter, FilterContext, SearchKey};
use bp_core::{ProbeContext, SearchCriteria};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const OWN_PID: u32 = 999;
const POLL: Duration = Duration::from_millis(10);
// Scheduling allowance on loaded CI machines.
const SLACK: Duration = Duration::from_millis(500);

fn context(table: MockProcessTable, timeout: Duration) -> ProbeContext {
    let mut config = ProbeConfig::default();
    config.search.timeout_secs = timeout.as_secs_f64();
    config.search.poll_interval_ms = POLL.as_millis() as u64;
    ProbeContext::with_table(config, Arc::new(table))
}

#[test]
fn connection_appearing_late_is_found() {
    let bus = Arc::new(MockBus::new());
    let ctx = context(MockProcessTable::new(), Duration::from_secs(5));

    let late = Arc::clone(&bus);
    let spawner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        late.add_endpoint(MockEndpoint::new(":1.9", 300).application("calc"));
    });

    let found = ctx
        .search(bus.clone())
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new().with_application_name("calc"), None)
        .unwrap();
    spawner.join().unwrap();

    assert_eq!(found, ":1.9");
    assert!(bus.calls("ListNames") >= 2);
}

#[test]
fn no_results_waits_out_the_timeout() {
    let bus = Arc::new(MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 100)));
    let ctx = context(MockProcessTable::new(), Duration::from_millis(80));

    let started = Instant::now();
    let result = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new().with_connection_name(":1.7"), None);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(80));
    assert!(
        elapsed < Duration::from_millis(80) + POLL + SLACK,
        "search overran its budget: {elapsed:?}"
    );
    match result {
        Err(Error::NoResults { criteria }) => {
            assert_eq!(
                criteria,
                "connection name = ':1.7', object path = '/com/canonical/Autopilot/Introspection'"
            );
        }
        other => panic!("expected NoResults, got {other:?}"),
    }
}

#[test]
fn unmatched_pid_gives_no_results_after_two_seconds() {
    let bus = Arc::new(
        MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100).application("calc"))
            .with_endpoint(MockEndpoint::new(":1.6", 101).application("calendar")),
    );
    let table = MockProcessTable::new()
        .with_process(100, 1, "calc")
        .with_process(101, 1, "calendar")
        .with_process(1234, 1, "idle");
    let timeout = Duration::from_secs(2);
    let ctx = context(table, timeout);

    let started = Instant::now();
    let result = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new().with_pid(1234), None);
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + POLL + SLACK, "search overran its budget: {elapsed:?}");
    match result {
        Err(Error::NoResults { criteria }) => {
            assert_eq!(
                criteria,
                "pid = 1234, object path = '/com/canonical/Autopilot/Introspection'"
            );
        }
        other => panic!("expected NoResults, got {other:?}"),
    }
}

#[test]
fn process_exiting_mid_search_stops_the_loop() {
    let bus = Arc::new(MockBus::new());
    let ctx = context(MockProcessTable::new(), Duration::from_secs(30));
    let handle = MockProcess::running(4242);
    let mut watched = handle.clone();

    let exiter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(40));
        handle.exit_with(-15);
    });

    let started = Instant::now();
    let result = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new(), Some(&mut watched));
    exiter.join().unwrap();

    assert!(matches!(result, Err(Error::ProcessExited { exit_code: -15 })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn application_name_skips_incompatible_endpoints() {
    let bus = Arc::new(
        MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100).application("calc").version("1.3"))
            .with_endpoint(MockEndpoint::plain(":1.6", 101))
            .with_endpoint(MockEndpoint::new(":1.7", 102).application("calendar"))
            .with_endpoint(MockEndpoint::new(":1.8", 103).application("calc")),
    );
    let ctx = context(MockProcessTable::new(), Duration::ZERO);

    let found = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new().with_application_name("calc"), None)
        .unwrap();
    assert_eq!(found, ":1.8");
}

#[test]
fn launcher_pid_finds_its_child_application() {
    let bus = Arc::new(
        MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 500).application("calc"))
            .with_endpoint(MockEndpoint::new(":1.6", 600).application("other")),
    );
    let table = MockProcessTable::new()
        .with_process(400, 1, "launcher")
        .with_process(450, 400, "sh")
        .with_process(500, 450, "calc")
        .with_process(600, 1, "other");
    let ctx = context(table, Duration::ZERO);

    let found = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find(&SearchCriteria::new().with_pid(400), None)
        .unwrap();
    assert_eq!(found, ":1.5");
}

#[test]
fn process_name_builds_application_proxy() {
    let bus = Arc::new(
        MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 700).qt().application("calc")),
    );
    let table = MockProcessTable::new().with_process(700, 1, "calc");
    let ctx = context(table, Duration::ZERO);

    let app = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .get_proxy_object_for_existing_process_by_name("calc", &ctx.proxy_builder())
        .unwrap();
    assert_eq!(app.type_name(), "calc");
    assert_eq!(app.process_pid().unwrap(), 700);
    assert!(app.qt().is_some());
}

#[test]
fn capability_failure_surfaces_from_existing_process_lookup() {
    let bus = Arc::new(MockBus::new().with_endpoint(
        MockEndpoint::new(":1.5", 700).application("calc").version("1.3"),
    ));
    let table = MockProcessTable::new().with_process(700, 1, "calc");
    let ctx = context(table, Duration::ZERO);

    // The path filter only needs introspection; the version mismatch is
    // only fatal once the proxy is built.
    let result = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .get_proxy_object_for_existing_process(
            SearchCriteria::new().with_pid(700),
            None,
            &ctx.proxy_builder(),
        );
    assert!(matches!(result, Err(Error::ProtocolMismatch { .. })));
}

/// Accepts only well-known names under a prefix.
#[derive(Debug)]
struct WellKnownPrefix;

impl Filter for WellKnownPrefix {
    fn name(&self) -> &'static str {
        "well_known_prefix"
    }

    fn priority(&self) -> i32 {
        11
    }

    fn matches(
        &self,
        candidate: Candidate<'_>,
        criteria: &SearchCriteria,
        _: &FilterContext<'_>,
    ) -> bool {
        criteria
            .connection_name()
            .is_some_and(|prefix| candidate.connection.starts_with(prefix))
    }
}

#[test]
fn custom_lookup_replaces_a_filter() {
    let bus: Arc<dyn Bus> = Arc::new(
        MockBus::new()
            .with_endpoint(MockEndpoint::new("com.example.Calc", 100))
            .with_endpoint(MockEndpoint::new("org.other.Editor", 101)),
    );
    let mut lookup = default_lookup();
    lookup.insert(SearchKey::ConnectionName, Arc::new(WellKnownPrefix));
    let ctx = context(MockProcessTable::new(), Duration::ZERO);

    let found = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .with_lookup(lookup)
        .find(&SearchCriteria::new().with_connection_name("com.example"), None)
        .unwrap();
    assert_eq!(found, "com.example.Calc");
}

#[test]
fn list_reports_every_introspectable_process_once() {
    let bus = Arc::new(
        MockBus::new()
            .with_endpoint(MockEndpoint::new(":1.5", 100))
            .with_endpoint(MockEndpoint::new("com.example.Calc", 100))
            .with_endpoint(MockEndpoint::new(":1.6", OWN_PID))
            .with_endpoint(MockEndpoint::plain(":1.7", 102))
            .with_endpoint(MockEndpoint::new(":1.8", 103)),
    );
    let ctx = context(MockProcessTable::new(), Duration::ZERO);

    let connections = ctx
        .search(bus)
        .with_own_pid(OWN_PID)
        .find_all(&ctx.config().search.object_path)
        .unwrap();
    assert_eq!(
        connections,
        vec![(":1.5".to_string(), 100), (":1.8".to_string(), 103)]
    );
}
