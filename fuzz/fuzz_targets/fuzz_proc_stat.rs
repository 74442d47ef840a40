//! Fuzz target for /proc/[pid]/stat parsing.
//!
//! Tests that `parse_stat` handles arbitrary input without panicking.

#![no_main]

use bp_core::process::parse_stat;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, u32)| {
    let (content, pid) = data;
    let _ = parse_stat(content, pid);
});
