//! Proxy class resolution.
//!
//! Every proxy node has a [`ProxyClass`]: its type name, the emulator base
//! it descends from, the custom class (if any) that claimed it, and the
//! capability extensions of the tree it belongs to. Classes are cached per
//! `(base, capabilities, path, attribute-name set)` so sibling nodes with
//! the same shape share one definition, while trees built from endpoints
//! with different capabilities never do.

use super::capability::{Capability, CapabilitySet};
use crate::logging::{event_names, Stage};
use crate::query::classname_from_path;
use crate::types::NodeState;
use bp_common::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A user-defined proxy class.
///
/// Implementations claim remote objects through [`validate`]. Two classes
/// of the same base claiming one object is an error.
///
/// [`validate`]: CustomProxyClass::validate
pub trait CustomProxyClass: Send + Sync + fmt::Debug {
    /// Class name, normally the remote type it fronts.
    fn type_name(&self) -> &str;

    /// Node name used when selecting objects of this class.
    fn query_name(&self) -> &str {
        self.type_name()
    }

    /// Whether this class should front the object at `path` with `state`.
    ///
    /// Results are cached by path and attribute names, so the decision
    /// should not depend on attribute values.
    fn validate(&self, path: &[u8], _state: &NodeState) -> bool {
        classname_from_path(path) == self.type_name()
    }
}

/// Identity of a family of proxy classes.
///
/// Each base gets a fresh uuid, so two bases with the same name never
/// share cached classes.
#[derive(Debug, Clone)]
pub struct EmulatorBase {
    id: Uuid,
    name: String,
    classes: Vec<Arc<dyn CustomProxyClass>>,
}

impl EmulatorBase {
    pub fn new(name: impl Into<String>) -> Self {
        EmulatorBase {
            id: Uuid::new_v4(),
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: impl CustomProxyClass + 'static) -> Self {
        self.classes.push(Arc::new(class));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classes(&self) -> &[Arc<dyn CustomProxyClass>] {
        &self.classes
    }
}

impl Default for EmulatorBase {
    fn default() -> Self {
        EmulatorBase::new("DefaultEmulatorBase")
    }
}

/// A resolved proxy type.
#[derive(Debug)]
pub struct ProxyClass {
    type_name: String,
    base_id: Uuid,
    custom: Option<Arc<dyn CustomProxyClass>>,
    capabilities: CapabilitySet,
    attribute_names: Vec<String>,
}

impl ProxyClass {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn base_id(&self) -> Uuid {
        self.base_id
    }

    /// The custom class that claimed the object, if any.
    pub fn custom(&self) -> Option<&Arc<dyn CustomProxyClass>> {
        self.custom.as_ref()
    }

    /// Whether the class was generated rather than user-defined.
    pub fn is_generated(&self) -> bool {
        self.custom.is_none()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Attribute names of the state this class was resolved for.
    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClassKey {
    base: Uuid,
    capabilities: CapabilitySet,
    path: Vec<u8>,
    shape: Vec<String>,
}

/// Process-wide cache of resolved proxy classes.
#[derive(Debug, Default)]
pub struct ObjectClassRegistry {
    classes: Mutex<HashMap<ClassKey, Arc<ProxyClass>>>,
}

impl ObjectClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the class for the object at `path` with `state`, in a tree
    /// whose root advertised `capabilities`.
    pub fn resolve(
        &self,
        base: &EmulatorBase,
        capabilities: &CapabilitySet,
        path: &[u8],
        state: &NodeState,
    ) -> Result<Arc<ProxyClass>> {
        let key = ClassKey {
            base: base.id(),
            capabilities: capabilities.clone(),
            path: path.to_vec(),
            shape: state.attribute_names(),
        };

        let mut classes = self
            .classes
            .lock()
            .map_err(|_| Error::InvalidState("object class registry poisoned".into()))?;
        if let Some(class) = classes.get(&key) {
            return Ok(Arc::clone(class));
        }

        let matching: Vec<&Arc<dyn CustomProxyClass>> = base
            .classes()
            .iter()
            .filter(|class| class.validate(path, state))
            .collect();
        if matching.len() > 1 {
            return Err(Error::AmbiguousProxyClass {
                path: String::from_utf8_lossy(path).into_owned(),
                candidates: matching.iter().map(|c| c.type_name().to_string()).collect(),
            });
        }

        let capabilities = key.capabilities.clone();
        let class = match matching.first() {
            Some(custom) => ProxyClass {
                type_name: custom.type_name().to_string(),
                base_id: base.id(),
                custom: Some(Arc::clone(custom)),
                capabilities,
                attribute_names: key.shape.clone(),
            },
            None => {
                let type_name = classname_from_path(path);
                tracing::debug!(
                    target: event_names::CLASS_GENERATED,
                    stage = %Stage::Query,
                    type_name = %type_name,
                    base = %base.name(),
                    "Generating introspection instance for type '{}' based on generic class.",
                    type_name
                );
                ProxyClass {
                    type_name,
                    base_id: base.id(),
                    custom: None,
                    capabilities,
                    attribute_names: key.shape.clone(),
                }
            }
        };

        let class = Arc::new(class);
        classes.insert(key, Arc::clone(&class));
        Ok(class)
    }

    /// Number of cached classes.
    pub fn len(&self) -> usize {
        self.classes.lock().map(|classes| classes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
