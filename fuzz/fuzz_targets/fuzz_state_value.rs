//! Fuzz target for decoding `[type_id, values...]` state attributes.
//!
//! Wrong arities and unexpected value kinds must be errors, not panics.

#![no_main]

use arbitrary::Arbitrary;
use bp_core::bus::WireValue;
use bp_core::types::StateValue;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<Scalar> for WireValue {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(v) => WireValue::Bool(v),
            Scalar::Int(v) => WireValue::Int(v),
            Scalar::UInt(v) => WireValue::UInt(v),
            Scalar::Double(v) => WireValue::Double(v),
            Scalar::Text(v) => WireValue::Text(v),
            Scalar::Bytes(v) => WireValue::Bytes(v),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Attribute {
    type_id: Scalar,
    values: Vec<Scalar>,
}

fuzz_target!(|attr: Attribute| {
    let mut items = vec![WireValue::from(attr.type_id)];
    items.extend(attr.values.into_iter().map(WireValue::from));
    if let Ok(value) = StateValue::decode(&WireValue::List(items)) {
        let _ = value.to_string();
        let _ = value.matches(&WireValue::Int(0));
    }
});
