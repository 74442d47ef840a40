//! Capability discovery from introspection documents.
//!
//! The introspection document lists every interface an endpoint exports.
//! The base introspection interface is mandatory; toolkit extension
//! interfaces switch on optional proxy features. Unknown interfaces are
//! ignored.

use crate::constants::{AP_INTROSPECTION_IFACE, QT_AUTOPILOT_IFACE};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Optional feature sets a proxy tree may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Qt signal/slot extension.
    Qt,
}

impl Capability {
    pub const ALL: [Capability; 1] = [Capability::Qt];

    /// Interface whose presence enables this capability.
    pub fn interface(self) -> &'static str {
        match self {
            Capability::Qt => QT_AUTOPILOT_IFACE,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Qt => write!(f, "qt"),
        }
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

fn interface_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"<interface\s+name\s*=\s*["']([^"']+)["']"#).ok())
        .as_ref()
}

/// Interface names declared in an introspection document, in order.
pub fn interfaces_in(xml: &str) -> Vec<String> {
    let Some(pattern) = interface_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether `xml` declares `interface`.
pub fn advertises(xml: &str, interface: &str) -> bool {
    interfaces_in(xml).iter().any(|name| name == interface)
}

/// Capabilities advertised by `xml`, or `None` when the mandatory base
/// introspection interface is missing.
pub fn discover(xml: &str) -> Option<CapabilitySet> {
    let interfaces = interfaces_in(xml);
    if !interfaces.iter().any(|name| name == AP_INTROSPECTION_IFACE) {
        return None;
    }
    Some(
        Capability::ALL
            .into_iter()
            .filter(|cap| interfaces.iter().any(|name| name == cap.interface()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DBUS_INTROSPECTION_IFACE;
    use crate::mock_bus::introspection_xml;

    #[test]
    fn extracts_interface_names() {
        let xml = introspection_xml(&[DBUS_INTROSPECTION_IFACE, AP_INTROSPECTION_IFACE]);
        assert_eq!(
            interfaces_in(&xml),
            vec![DBUS_INTROSPECTION_IFACE, AP_INTROSPECTION_IFACE]
        );
    }

    #[test]
    fn tolerates_single_quotes_and_spacing() {
        let xml = "<node><interface  name = 'com.example.Thing'/></node>";
        assert_eq!(interfaces_in(xml), vec!["com.example.Thing"]);
    }

    #[test]
    fn base_interface_is_mandatory() {
        let xml = introspection_xml(&[DBUS_INTROSPECTION_IFACE, QT_AUTOPILOT_IFACE]);
        assert_eq!(discover(&xml), None);
    }

    #[test]
    fn qt_marker_enables_qt_capability() {
        let xml = introspection_xml(&[AP_INTROSPECTION_IFACE, QT_AUTOPILOT_IFACE]);
        let caps = discover(&xml).unwrap();
        assert!(caps.contains(&Capability::Qt));
    }

    #[test]
    fn unknown_interfaces_are_ignored() {
        let xml = introspection_xml(&[AP_INTROSPECTION_IFACE, "com.example.Future"]);
        assert_eq!(discover(&xml), Some(CapabilitySet::new()));
    }

    #[test]
    fn prefix_names_do_not_count() {
        let xml = introspection_xml(&["com.canonical.Autopilot.IntrospectionV2"]);
        assert!(!advertises(&xml, AP_INTROSPECTION_IFACE));
    }
}
