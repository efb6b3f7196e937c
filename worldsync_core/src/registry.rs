//! Component registry - which component kinds this worker tracks.

use crate::component::Component;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldsync_env::ComponentKind;

/// A registry entry as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub kind: ComponentKind,
    pub name: String,
}

/// Kinds known to this worker, with their schema names.
///
/// The local view only stores registered kinds; everything else on the
/// event stream is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRegistry {
    names: BTreeMap<ComponentKind, String>,
}

impl ComponentRegistry {
    /// Registry with the well-known kinds (ACL, metadata, position, interest).
    pub fn new() -> Self {
        let mut names = BTreeMap::new();
        names.insert(ComponentKind::ENTITY_ACL, "EntityAcl".to_string());
        names.insert(ComponentKind::METADATA, "Metadata".to_string());
        names.insert(ComponentKind::POSITION, "Position".to_string());
        names.insert(ComponentKind::INTEREST, "Interest".to_string());
        Self { names }
    }

    /// Registers a kind under a name, replacing any previous name.
    pub fn register(&mut self, kind: ComponentKind, name: impl Into<String>) {
        self.names.insert(kind, name.into());
    }

    /// Registers a schema type.
    pub fn register_type<C: Component>(&mut self) {
        self.register(C::KIND, C::NAME);
    }

    /// Builder-style registration.
    pub fn with<C: Component>(mut self) -> Self {
        self.register_type::<C>();
        self
    }

    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.names.contains_key(&kind)
    }

    pub fn name(&self, kind: ComponentKind) -> Option<&str> {
        self.names.get(&kind).map(String::as_str)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.names.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FromIterator<&'a ComponentEntry> for ComponentRegistry {
    fn from_iter<I: IntoIterator<Item = &'a ComponentEntry>>(iter: I) -> Self {
        let mut registry = Self::new();
        for entry in iter {
            registry.register(entry.kind, entry.name.clone());
        }
        registry
    }
}
