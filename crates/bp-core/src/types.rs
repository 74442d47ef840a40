//! Typed attribute values decoded from GetState replies.
//!
//! Every attribute arrives as a list whose first element is a type id and
//! whose remaining elements are the payload. The id decides the arity:
//!
//! | id | type       | values |
//! |----|------------|--------|
//! | 0  | plain      | 1      |
//! | 1  | rectangle  | 4      |
//! | 2  | point      | 2      |
//! | 3  | size       | 2      |
//! | 4  | color      | 4      |
//! | 5  | date-time  | 1      |
//! | 6  | time       | 4      |
//! | 7  | 3-D point  | 3      |
//!
//! Any other id is kept raw as [`StateValue::Unknown`].

use crate::bus::{RawState, WireValue};
use crate::logging::{event_names, Stage};
use bp_common::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateValue {
    Plain { value: WireValue },
    Rectangle { x: f64, y: f64, w: f64, h: f64 },
    Point { x: f64, y: f64 },
    Size { w: f64, h: f64 },
    Color { red: i64, green: i64, blue: i64, alpha: i64 },
    DateTime { value: DateTime<Utc> },
    Time { hour: i64, minute: i64, second: i64, millisecond: i64 },
    Point3d { x: f64, y: f64, z: f64 },
    Unknown { type_id: i64, values: Vec<WireValue> },
}

impl StateValue {
    /// Decode one `[type_id, values...]` attribute.
    pub fn decode(raw: &WireValue) -> Result<StateValue> {
        let items = raw
            .as_list()
            .ok_or_else(|| Error::InvalidState(format!("attribute is not a list: {raw:?}")))?;
        let (type_id, values) = items
            .split_first()
            .ok_or_else(|| Error::InvalidState("Cannot create attribute, no data supplied".into()))?;
        let type_id = type_id
            .as_i64()
            .ok_or_else(|| Error::InvalidState(format!("type id is not an integer: {type_id:?}")))?;

        let value = match type_id {
            0 => {
                let [value] = arity::<1>("plain", values)?;
                StateValue::Plain {
                    value: value.clone(),
                }
            }
            1 => {
                let [x, y, w, h] = arity::<4>("rectangle", values)?;
                StateValue::Rectangle {
                    x: float(x)?,
                    y: float(y)?,
                    w: float(w)?,
                    h: float(h)?,
                }
            }
            2 => {
                let [x, y] = arity::<2>("point", values)?;
                StateValue::Point {
                    x: float(x)?,
                    y: float(y)?,
                }
            }
            3 => {
                let [w, h] = arity::<2>("size", values)?;
                StateValue::Size {
                    w: float(w)?,
                    h: float(h)?,
                }
            }
            4 => {
                let [red, green, blue, alpha] = arity::<4>("color", values)?;
                StateValue::Color {
                    red: int(red)?,
                    green: int(green)?,
                    blue: int(blue)?,
                    alpha: int(alpha)?,
                }
            }
            5 => {
                let [timestamp] = arity::<1>("datetime", values)?;
                StateValue::DateTime {
                    value: timestamp_to_utc(float(timestamp)?)?,
                }
            }
            6 => {
                let [hour, minute, second, millisecond] = arity::<4>("time", values)?;
                StateValue::Time {
                    hour: int(hour)?,
                    minute: int(minute)?,
                    second: int(second)?,
                    millisecond: int(millisecond)?,
                }
            }
            7 => {
                let [x, y, z] = arity::<3>("point3d", values)?;
                StateValue::Point3d {
                    x: float(x)?,
                    y: float(y)?,
                    z: float(z)?,
                }
            }
            other => {
                tracing::warn!(type_id = other, "unknown attribute type id");
                StateValue::Unknown {
                    type_id: other,
                    values: values.to_vec(),
                }
            }
        };
        Ok(value)
    }

    /// Compare against a filter or expected value supplied by the caller.
    ///
    /// Plain values compare as scalars (integers and doubles are
    /// interchangeable). Compound values compare against a list of their
    /// components in declaration order.
    pub fn matches(&self, expected: &WireValue) -> bool {
        match self {
            StateValue::Plain { value } => scalar_eq(value, expected),
            StateValue::DateTime { value } => expected
                .as_f64()
                .is_some_and(|ts| (value.timestamp() as f64 - ts).abs() < 1.0),
            StateValue::Unknown { values, .. } => {
                expected.as_list().is_some_and(|items| items == values.as_slice())
            }
            compound => match expected.as_list() {
                Some(items) => {
                    let mine = compound.components();
                    mine.len() == items.len()
                        && mine
                            .iter()
                            .zip(items)
                            .all(|(a, b)| b.as_f64().is_some_and(|b| (a - b).abs() < f64::EPSILON))
                }
                None => false,
            },
        }
    }

    fn components(&self) -> Vec<f64> {
        match self {
            StateValue::Rectangle { x, y, w, h } => vec![*x, *y, *w, *h],
            StateValue::Point { x, y } => vec![*x, *y],
            StateValue::Size { w, h } => vec![*w, *h],
            StateValue::Color {
                red,
                green,
                blue,
                alpha,
            } => vec![*red as f64, *green as f64, *blue as f64, *alpha as f64],
            StateValue::Time {
                hour,
                minute,
                second,
                millisecond,
            } => vec![
                *hour as f64,
                *minute as f64,
                *second as f64,
                *millisecond as f64,
            ],
            StateValue::Point3d { x, y, z } => vec![*x, *y, *z],
            _ => Vec::new(),
        }
    }

    /// The scalar payload of a plain value.
    pub fn as_plain(&self) -> Option<&WireValue> {
        match self {
            StateValue::Plain { value } => Some(value),
            _ => None,
        }
    }
}

fn arity<'a, const N: usize>(kind: &str, values: &'a [WireValue]) -> Result<[&'a WireValue; N]> {
    let refs: Vec<&WireValue> = values.iter().collect();
    refs.try_into().map_err(|refs: Vec<&WireValue>| {
        Error::InvalidState(format!(
            "{kind} must be constructed with {N} arguments, not {}",
            refs.len()
        ))
    })
}

fn float(value: &WireValue) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::InvalidState(format!("expected a number, got {value:?}")))
}

fn int(value: &WireValue) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::InvalidState(format!("expected an integer, got {value:?}")))
}

fn timestamp_to_utc(timestamp: f64) -> Result<DateTime<Utc>> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos)
        .ok_or_else(|| Error::InvalidState(format!("timestamp out of range: {timestamp}")))
}

fn scalar_eq(actual: &WireValue, expected: &WireValue) -> bool {
    match (actual, expected) {
        (WireValue::Bool(a), WireValue::Bool(b)) => a == b,
        (WireValue::Text(a), WireValue::Text(b)) => a == b,
        (WireValue::Bytes(a), WireValue::Text(b)) | (WireValue::Text(b), WireValue::Bytes(a)) => {
            a.as_slice() == b.as_bytes()
        }
        (WireValue::Double(_), _) | (_, WireValue::Double(_)) => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (a, b) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Plain { value } => match value {
                WireValue::Text(s) => write!(f, "{s:?}"),
                WireValue::Bool(true) => write!(f, "True"),
                WireValue::Bool(false) => write!(f, "False"),
                WireValue::Int(v) => write!(f, "{v}"),
                WireValue::UInt(v) => write!(f, "{v}"),
                WireValue::Double(v) => write!(f, "{v}"),
                other => write!(f, "{other:?}"),
            },
            StateValue::Rectangle { x, y, w, h } => write!(f, "Rectangle({x}, {y}, {w}, {h})"),
            StateValue::Point { x, y } => write!(f, "Point({x}, {y})"),
            StateValue::Size { w, h } => write!(f, "Size({w}, {h})"),
            StateValue::Color {
                red,
                green,
                blue,
                alpha,
            } => write!(f, "Color({red}, {green}, {blue}, {alpha})"),
            StateValue::DateTime { value } => write!(f, "DateTime({})", value.to_rfc3339()),
            StateValue::Time {
                hour,
                minute,
                second,
                millisecond,
            } => write!(f, "Time({hour:02}:{minute:02}:{second:02}.{millisecond:03})"),
            StateValue::Point3d { x, y, z } => write!(f, "Point3D({x}, {y}, {z})"),
            StateValue::Unknown { type_id, values } => write!(f, "Unknown({type_id}, {values:?})"),
        }
    }
}

/// Decoded state of one remote object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeState {
    pub id: i64,
    /// Decoded attributes in the order the endpoint sent them.
    pub attributes: IndexMap<String, StateValue>,
}

impl NodeState {
    /// Decode a raw state dictionary.
    ///
    /// Attribute names have `-` replaced by `_`. Attributes that fail to
    /// decode are logged and skipped; a missing or undecodable `id` is an
    /// error.
    pub fn decode(raw: &RawState) -> Result<NodeState> {
        let mut attributes = IndexMap::new();
        for (name, value) in raw {
            let name = name.replace('-', "_");
            match StateValue::decode(value) {
                Ok(decoded) => {
                    attributes.insert(name, decoded);
                }
                Err(e) => {
                    tracing::warn!(
                        target: event_names::QUERY_ATTRIBUTE_SKIPPED,
                        stage = %Stage::Query,
                        attribute = %name,
                        error = %e,
                        "skipping attribute that failed to decode"
                    );
                }
            }
        }

        let id = attributes
            .get("id")
            .and_then(StateValue::as_plain)
            .and_then(WireValue::as_i64)
            .ok_or_else(|| Error::InvalidState("state has no integer 'id' attribute".into()))?;

        Ok(NodeState { id, attributes })
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.attributes.get(name)
    }

    /// Sorted attribute names; the shape used for class lookup.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether every filter matches this state.
    pub fn matches_filters<'a>(
        &self,
        filters: impl IntoIterator<Item = (&'a String, &'a WireValue)>,
    ) -> bool {
        filters.into_iter().all(|(key, expected)| {
            self.attributes
                .get(key)
                .is_some_and(|value| value.matches(expected))
        })
    }
}
