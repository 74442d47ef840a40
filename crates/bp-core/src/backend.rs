//! Query execution against one endpoint.

use crate::address::BusAddress;
use crate::bus::RawNode;
use crate::logging::{event_names, Stage};
use crate::query::Query;
use bp_common::Result;
use std::time::Instant;

/// Default number of objects above which a reply is logged as slow.
pub const DEFAULT_LARGE_REPLY_WARNING: usize = 15;

/// Executes [`Query`]s against a [`BusAddress`].
#[derive(Debug, Clone)]
pub struct Backend {
    address: BusAddress,
    large_reply_warning: usize,
}

impl Backend {
    pub fn new(address: BusAddress) -> Self {
        Backend {
            address,
            large_reply_warning: DEFAULT_LARGE_REPLY_WARNING,
        }
    }

    pub fn with_large_reply_warning(mut self, threshold: usize) -> Self {
        self.large_reply_warning = threshold;
        self
    }

    pub fn address(&self) -> &BusAddress {
        &self.address
    }

    /// Run `query` and return the raw `(path, state)` reply.
    ///
    /// A vanished application surfaces as `Error::BackendLost`.
    pub fn execute_query_get_data(&self, query: &Query) -> Result<Vec<RawNode>> {
        let started = Instant::now();
        let data = self.address.get_state(&query.server_query_bytes())?;

        tracing::debug!(
            target: event_names::QUERY_ISSUED,
            stage = %Stage::Query,
            query = %query,
            objects = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "GetState"
        );

        if data.len() > self.large_reply_warning {
            tracing::warn!(
                target: event_names::QUERY_LARGE_REPLY,
                stage = %Stage::Query,
                query = %query,
                objects = data.len(),
                "Your query {} returned a lot of data ({} items). This is likely to be slow. \
                 You may want to consider optimising your query to return fewer items.",
                query,
                data.len()
            );
        }
        Ok(data)
    }
}
