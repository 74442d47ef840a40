//! Process-wide engine state.
//!
//! The version-check cache and the class registry live for the whole
//! process and are shared by every search and proxy built from one
//! [`ProbeContext`]. The child-pid cache is per pass and lives inside the
//! search itself.

use crate::address::VersionCheckCache;
use crate::bus::Bus;
use crate::config::ProbeConfig;
use crate::logging::{generate_run_id, get_host_id, LogContext};
use crate::process::{ProcFsTable, ProcessTable};
use crate::proxy::{ObjectClassRegistry, ProxyBuilder};
use crate::search::ConnectionSearch;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProbeContext {
    versions: Arc<VersionCheckCache>,
    registry: Arc<ObjectClassRegistry>,
    table: Arc<dyn ProcessTable>,
    config: ProbeConfig,
    log: LogContext,
}

impl ProbeContext {
    /// Context over the live `/proc` process table.
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_table(config, Arc::new(ProcFsTable))
    }

    pub fn with_table(config: ProbeConfig, table: Arc<dyn ProcessTable>) -> Self {
        ProbeContext {
            versions: Arc::new(VersionCheckCache::new()),
            registry: Arc::new(ObjectClassRegistry::new()),
            table,
            config,
            log: LogContext::new(generate_run_id(), get_host_id()),
        }
    }

    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn versions(&self) -> &Arc<VersionCheckCache> {
        &self.versions
    }

    pub fn registry(&self) -> &Arc<ObjectClassRegistry> {
        &self.registry
    }

    pub fn process_table(&self) -> &Arc<dyn ProcessTable> {
        &self.table
    }

    /// A search on `bus` using the configured timeout and poll interval.
    pub fn search(&self, bus: Arc<dyn Bus>) -> ConnectionSearch {
        ConnectionSearch::new(bus, Arc::clone(&self.table), Arc::clone(&self.versions))
            .with_timeout(self.config.search_timeout())
            .with_poll_interval(self.config.poll_interval())
            .with_log_context(self.log.clone())
    }

    /// A builder sharing this context's class registry.
    pub fn proxy_builder(&self) -> ProxyBuilder {
        ProxyBuilder::new(Arc::clone(&self.registry))
            .with_large_reply_warning(self.config.query.large_reply_warning)
            .with_wait(self.config.wait_timeout(), self.config.poll_interval())
    }
}
