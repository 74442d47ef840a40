//! Process and bus connection identity types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID wrapper with display formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

/// A name identifying one endpoint on a message bus.
///
/// Either a unique name (`:1.42`) assigned by the bus daemon or a
/// well-known name (`org.example.Calculator`) claimed by a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ConnectionName(pub String);

impl ConnectionName {
    pub fn new(name: impl Into<String>) -> Self {
        ConnectionName(name.into())
    }

    /// Unique names are assigned by the bus daemon and start with ':'.
    pub fn is_unique(&self) -> bool {
        self.0.starts_with(':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionName {
    fn from(name: &str) -> Self {
        ConnectionName(name.to_string())
    }
}

impl From<String> for ConnectionName {
    fn from(name: String) -> Self {
        ConnectionName(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_is_transparent() {
        assert_eq!(serde_json::to_string(&ProcessId(42)).unwrap(), "42");
        assert_eq!(ProcessId::from(7).to_string(), "7");
    }

    #[test]
    fn connection_name_uniqueness() {
        assert!(ConnectionName::from(":1.42").is_unique());
        assert!(!ConnectionName::from("org.example.Calc").is_unique());
    }

    #[test]
    fn connection_name_serializes_as_string() {
        let name = ConnectionName::new(":1.5");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\":1.5\"");
    }
}
