//! Selection queries sent to GetState.
//!
//! A [`Query`] is an immutable chain of steps, each selecting nodes by
//! name relative to the previous step: `/` selects children, `//` selects
//! descendants and `..` selects the parent. Steps may carry attribute
//! filters. Filters the server can evaluate are rendered into the query
//! bytes as `[key=value,...]`; everything else is kept aside and applied
//! to the reply on the client.
//!
//! ```ignore
//! let query = Query::root("calc")?
//!     .select_descendant("Button", Filters::from([("label".into(), "7".into())]))?;
//! assert_eq!(query.server_query_bytes(), b"/calc//Button[label=\"7\"]");
//! ```

use crate::bus::WireValue;
use bp_common::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Attribute filters for one query step, keyed by attribute name.
pub type Filters = BTreeMap<String, WireValue>;

/// Node name matching any type.
pub const WILDCARD: &[u8] = b"*";

const PARENT: &[u8] = b"..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `/`: the root, or immediate children of the previous step.
    Child,
    /// `//`: any descendant of the previous step.
    Descendant,
}

impl Operation {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            Operation::Child => b"/",
            Operation::Descendant => b"//",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    parent: Option<Box<Query>>,
    operation: Operation,
    name: Vec<u8>,
    server_filters: Filters,
    client_filters: Filters,
}

impl Query {
    fn new(
        parent: Option<&Query>,
        operation: Operation,
        name: Vec<u8>,
        filters: Filters,
    ) -> Result<Query> {
        if let Some(parent) = parent {
            if parent.needs_client_side_filtering() {
                return Err(invalid(
                    "Cannot create a new query from a parent that requires client-side filter processing.",
                ));
            }
            if parent.server_query_bytes() == b"/" {
                return Err(invalid(
                    "Cannot select children from a pseudo-tree-root query.",
                ));
            }
        }
        if name == PARENT {
            if !filters.is_empty() {
                return Err(invalid("Cannot specify filters while selecting a parent"));
            }
            if operation != Operation::Child {
                return Err(invalid("Operation must be CHILD while selecting a parent"));
            }
        }

        let (server_filters, client_filters): (Filters, Filters) = filters
            .into_iter()
            .partition(|(key, value)| is_server_side_filter(key, value));

        if operation == Operation::Descendant && name == WILDCARD && server_filters.is_empty() {
            return Err(invalid(
                "Must provide at least one server-side filter when searching for descendants and using a wildcard node.",
            ));
        }

        Ok(Query {
            parent: parent.map(|p| Box::new(p.clone())),
            operation,
            name,
            server_filters,
            client_filters,
        })
    }

    /// Query selecting the root node by name (usually the application name).
    pub fn root(app_name: &str) -> Result<Query> {
        Query::new(None, Operation::Child, type_name_bytes(app_name)?, Filters::new())
    }

    /// Query selecting the tree root without knowing its name.
    ///
    /// The result cannot be extended with further steps.
    pub fn pseudo_tree_root() -> Query {
        Query {
            parent: None,
            operation: Operation::Child,
            name: Vec::new(),
            server_filters: Filters::new(),
            client_filters: Filters::new(),
        }
    }

    /// Query searching the entire tree for `child_name`.
    ///
    /// Slow on large applications; prefer rooted queries.
    pub fn whole_tree_search(child_name: &str, filters: Filters) -> Result<Query> {
        Query::new(
            None,
            Operation::Descendant,
            type_name_bytes(child_name)?,
            filters,
        )
    }

    /// Query selecting exactly the object at `path` with the given id.
    ///
    /// Only the last step carries the id filter.
    pub fn new_from_path_and_id(path: &[u8], id: i64) -> Result<Query> {
        let nodes: Vec<&[u8]> = path.split(|b| *b == b'/').filter(|n| !n.is_empty()).collect();
        if !path.starts_with(b"/") || nodes.is_empty() {
            return Err(invalid(&format!(
                "Invalid path '{}'.",
                String::from_utf8_lossy(path)
            )));
        }

        let last = nodes.len() - 1;
        let mut query = Query::new(None, Operation::Child, nodes[0].to_vec(), id_filter(id, last == 0))?;
        for (i, node) in nodes.iter().enumerate().skip(1) {
            query = Query::new(
                Some(&query),
                Operation::Child,
                node.to_vec(),
                id_filter(id, i == last),
            )?;
        }
        Ok(query)
    }

    pub fn select_child(&self, child_name: &str, filters: Filters) -> Result<Query> {
        Query::new(
            Some(self),
            Operation::Child,
            type_name_bytes(child_name)?,
            filters,
        )
    }

    pub fn select_descendant(&self, name: &str, filters: Filters) -> Result<Query> {
        Query::new(
            Some(self),
            Operation::Descendant,
            type_name_bytes(name)?,
            filters,
        )
    }

    /// Query selecting the parent of the current node.
    ///
    /// The parent of the root is the root itself; the server handles that.
    pub fn select_parent(&self) -> Result<Query> {
        Query::new(Some(self), Operation::Child, PARENT.to_vec(), Filters::new())
    }

    /// Whether any step carries filters the server cannot evaluate.
    pub fn needs_client_side_filtering(&self) -> bool {
        !self.client_filters.is_empty()
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.needs_client_side_filtering())
    }

    /// Filters of the last step that must be applied to the reply.
    pub fn client_filters(&self) -> &Filters {
        &self.client_filters
    }

    /// The full query as sent to the server.
    pub fn server_query_bytes(&self) -> Vec<u8> {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.server_query_bytes())
            .unwrap_or_default();
        out.extend_from_slice(self.operation.as_bytes());
        out.extend_from_slice(&self.name);
        if !self.server_filters.is_empty() {
            out.push(b'[');
            let rendered: Vec<String> = self
                .server_filters
                .iter()
                .map(|(key, value)| render_filter(key, value))
                .collect();
            out.extend_from_slice(rendered.join(",").as_bytes());
            out.push(b']');
        }
        out
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", String::from_utf8_lossy(&self.server_query_bytes()))
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidQuery(message.to_string())
}

fn id_filter(id: i64, last: bool) -> Filters {
    let mut filters = Filters::new();
    if last {
        filters.insert("id".to_string(), WireValue::Int(id));
    }
    filters
}

fn type_name_bytes(name: &str) -> Result<Vec<u8>> {
    if name.is_ascii() {
        Ok(name.as_bytes().to_vec())
    } else {
        Err(invalid(&format!(
            "Type name '{name}', must be ASCII encodable"
        )))
    }
}

fn filter_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_\-]+( [a-zA-Z0-9_\-])*$").ok())
        .as_ref()
}

/// Whether a filter can be evaluated by the server.
pub fn is_server_side_filter(key: &str, value: &WireValue) -> bool {
    let key_ok = filter_key_pattern().is_some_and(|re| re.is_match(key));
    let value_ok = match value {
        WireValue::Bool(_) => true,
        WireValue::Int(v) => i32::try_from(*v).is_ok(),
        WireValue::UInt(v) => i32::try_from(*v).is_ok(),
        WireValue::Text(s) => s.is_ascii(),
        WireValue::Bytes(b) => std::str::from_utf8(b).is_ok(),
        WireValue::Double(_) | WireValue::List(_) => false,
    };
    key_ok && value_ok
}

fn render_filter(key: &str, value: &WireValue) -> String {
    match value {
        WireValue::Bool(true) => format!("{key}=True"),
        WireValue::Bool(false) => format!("{key}=False"),
        WireValue::Int(v) => format!("{key}={v}"),
        WireValue::UInt(v) => format!("{key}={v}"),
        WireValue::Text(s) => format!("{key}=\"{}\"", escape(s)),
        WireValue::Bytes(b) => format!("{key}=\"{}\"", escape(&String::from_utf8_lossy(b))),
        // Never server-side, see is_server_side_filter.
        WireValue::Double(_) | WireValue::List(_) => String::new(),
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Last component of an object path: the remote class name.
pub fn classname_from_path(path: &[u8]) -> String {
    let name = path.rsplit(|b| *b == b'/').next().unwrap_or_default();
    String::from_utf8_lossy(name).into_owned()
}

/// First component of an object path: the root node name.
pub fn path_root(path: &[u8]) -> String {
    let name = path
        .split(|b| *b == b'/')
        .find(|n| !n.is_empty())
        .unwrap_or_default();
    String::from_utf8_lossy(name).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filters(pairs: &[(&str, WireValue)]) -> Filters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn bytes(query: &Query) -> String {
        String::from_utf8(query.server_query_bytes()).unwrap()
    }

    #[test]
    fn root_and_children() {
        let query = Query::root("calc")
            .unwrap()
            .select_child("Window", Filters::new())
            .unwrap()
            .select_descendant("Button", Filters::new())
            .unwrap();
        assert_eq!(bytes(&query), "/calc/Window//Button");
        assert_eq!(query.to_string(), "Query(/calc/Window//Button)");
    }

    #[test]
    fn server_filters_are_sorted_and_typed() {
        let query = Query::root("calc")
            .unwrap()
            .select_child(
                "Button",
                filters(&[
                    ("visible", true.into()),
                    ("label", "7".into()),
                    ("id", WireValue::Int(12)),
                ]),
            )
            .unwrap();
        assert_eq!(
            bytes(&query),
            "/calc/Button[id=12,label=\"7\",visible=True]"
        );
        assert!(!query.needs_client_side_filtering());
    }

    #[test]
    fn string_values_are_escaped() {
        let query = Query::whole_tree_search("Label", filters(&[("text", "a\"b\\c'd\n".into())]))
            .unwrap();
        assert_eq!(bytes(&query), r#"//Label[text="a\"b\\c\'d\n"]"#);
    }

    #[test]
    fn unsupported_filters_move_to_client_side() {
        let query = Query::root("calc")
            .unwrap()
            .select_child(
                "Slider",
                filters(&[
                    ("value", WireValue::Double(0.5)),
                    ("title", "café".into()),
                    ("big", WireValue::Int(1 << 40)),
                    ("objectName", "slider".into()),
                ]),
            )
            .unwrap();
        assert_eq!(bytes(&query), "/calc/Slider[objectName=\"slider\"]");
        assert!(query.needs_client_side_filtering());
        let client: Vec<&str> = query.client_filters().keys().map(String::as_str).collect();
        assert_eq!(client, vec!["big", "title", "value"]);
    }

    #[test]
    fn keys_with_bad_characters_are_client_side() {
        assert!(!is_server_side_filter("a.b", &WireValue::Int(1)));
        assert!(!is_server_side_filter("two  spaces", &WireValue::Int(1)));
        assert!(is_server_side_filter("a b", &WireValue::Int(1)));
        assert!(is_server_side_filter("object-name_2", &WireValue::Int(1)));
    }

    #[test]
    fn cannot_extend_client_filtered_query() {
        let query = Query::root("calc")
            .unwrap()
            .select_child("Slider", filters(&[("value", WireValue::Double(0.5))]))
            .unwrap();
        assert!(matches!(
            query.select_child("Handle", Filters::new()),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn descendant_wildcard_needs_server_filter() {
        let root = Query::root("calc").unwrap();
        assert!(root.select_descendant("*", Filters::new()).is_err());
        assert!(root
            .select_descendant("*", filters(&[("visible", true.into())]))
            .is_ok());
        assert!(root.select_child("*", Filters::new()).is_ok());
    }

    #[test]
    fn parent_select() {
        let query = Query::root("calc")
            .unwrap()
            .select_child("Window", Filters::new())
            .unwrap()
            .select_parent()
            .unwrap();
        assert_eq!(bytes(&query), "/calc/Window/..");
    }

    #[test]
    fn pseudo_root_cannot_be_extended() {
        let pseudo = Query::pseudo_tree_root();
        assert_eq!(bytes(&pseudo), "/");
        assert!(pseudo.select_child("Window", Filters::new()).is_err());
        assert!(pseudo.select_parent().is_err());
    }

    #[test]
    fn non_ascii_type_names_are_rejected() {
        assert!(Query::root("calcüla").is_err());
    }

    #[test]
    fn from_path_and_id_filters_only_the_last_node() {
        let query = Query::new_from_path_and_id(b"/calc/Window/Button", 42).unwrap();
        assert_eq!(bytes(&query), "/calc/Window/Button[id=42]");

        let root = Query::new_from_path_and_id(b"/calc", 1).unwrap();
        assert_eq!(bytes(&root), "/calc[id=1]");
    }

    #[test]
    fn from_path_and_id_rejects_relative_or_empty_paths() {
        assert!(Query::new_from_path_and_id(b"calc/Window", 1).is_err());
        assert!(Query::new_from_path_and_id(b"/", 1).is_err());
        assert!(Query::new_from_path_and_id(b"", 1).is_err());
    }

    #[test]
    fn path_helpers() {
        assert_eq!(classname_from_path(b"/calc/Window/Button"), "Button");
        assert_eq!(path_root(b"/calc/Window/Button"), "calc");
        assert_eq!(classname_from_path(b"/calc"), "calc");
    }

    proptest! {
        #[test]
        fn in_range_ints_are_server_side(key in "[a-z][a-z0-9_]{0,10}", v in any::<i32>()) {
            let query = Query::whole_tree_search("Item", filters(&[(key.as_str(), WireValue::Int(i64::from(v)))])).unwrap();
            prop_assert!(!query.needs_client_side_filtering());
            let rendered = bytes(&query);
            let expected = format!("//Item[{key}={v}]");
            prop_assert_eq!(rendered, expected);
        }

        #[test]
        fn rendered_strings_keep_quotes_balanced(s in "[ -~]{0,20}") {
            let query = Query::whole_tree_search("Item", filters(&[("text", s.as_str().into())])).unwrap();
            let rendered = bytes(&query);
            let inner = &rendered["//Item[text=\"".len()..rendered.len() - 2];
            // Every quote inside the value is escaped.
            let mut chars = inner.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    chars.next();
                } else {
                    prop_assert_ne!(c, '"');
                }
            }
        }
    }
}
