//! Transport-neutral values exchanged with introspection endpoints.

use indexmap::IndexMap;
use serde::Serialize;

/// A single value decoded from the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
}

impl WireValue {
    /// Integer view of numeric values, if representable as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(v) => Some(*v),
            WireValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Int(v) => Some(*v as f64),
            WireValue::UInt(v) => Some(*v as f64),
            WireValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int(v)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        WireValue::Int(v.into())
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        WireValue::Double(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Text(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Text(v)
    }
}

impl<T: Into<WireValue>> From<Vec<T>> for WireValue {
    fn from(v: Vec<T>) -> Self {
        WireValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Property name to `[type_id, values...]` list, in reply order.
pub type RawState = IndexMap<String, WireValue>;

/// One `(path, state)` pair from a GetState reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub path: Vec<u8>,
    pub state: RawState,
}

impl RawNode {
    pub fn new(path: impl Into<Vec<u8>>, state: RawState) -> Self {
        RawNode {
            path: path.into(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(WireValue::UInt(7).as_i64(), Some(7));
        assert_eq!(WireValue::UInt(u64::MAX).as_i64(), None);
        assert_eq!(WireValue::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(WireValue::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn vec_conversion_builds_lists() {
        let v: WireValue = vec![0i64, 5].into();
        assert_eq!(
            v,
            WireValue::List(vec![WireValue::Int(0), WireValue::Int(5)])
        );
    }

    #[test]
    fn serializes_untagged() {
        let v = WireValue::List(vec![WireValue::Int(0), WireValue::Text("ok".into())]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"[0,"ok"]"#);
    }
}
