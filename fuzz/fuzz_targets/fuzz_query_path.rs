//! Fuzz target for building queries from object paths reported by a remote.
//!
//! Malformed paths must surface as errors, never panics.

#![no_main]

use bp_core::query::Query;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&[u8], i64)| {
    let (path, id) = data;
    if let Ok(query) = Query::new_from_path_and_id(path, id) {
        let _ = query.server_query_bytes();
        let _ = query.select_parent();
        let _ = query.to_string();
    }
});
