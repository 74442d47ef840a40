//! Fuzz target for scanning introspection XML for interface names.

#![no_main]

use bp_core::proxy::capability::{advertises, interfaces_in};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|xml: &str| {
    let interfaces = interfaces_in(xml);
    // Every reported interface must also be advertised.
    for interface in &interfaces {
        assert!(advertises(xml, interface));
    }
});
