//! Common wire-level types shared by the engine and its transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of an entity in the distributed world.
///
/// Only ever obtained from a successful reservation; the coordinator is the
/// sole allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an outbound request.
///
/// Allocated by the transport, strictly increasing for the lifetime of a
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque, comparable component identity supplied by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKind(pub u32);

impl ComponentKind {
    /// Access control list of an entity.
    pub const ENTITY_ACL: ComponentKind = ComponentKind(50);

    /// Entity metadata (type name etc).
    pub const METADATA: ComponentKind = ComponentKind(53);

    /// World position; drives spatial interest.
    pub const POSITION: ComponentKind = ComponentKind(54);

    /// Query-based interest declarations.
    pub const INTEREST: ComponentKind = ComponentKind(58);
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "component:{}", self.0)
    }
}

/// Full state of one component instance, as a map of named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentData {
    pub fields: BTreeMap<String, Value>,
}

impl ComponentData {
    /// Creates empty component data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Applies a partial update: fields present in `update` replace the
    /// stored ones, every other field keeps its last known value.
    pub fn apply(&mut self, update: &ComponentUpdate) {
        for (name, value) in &update.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

/// A partial component update plus any transient events.
///
/// Events are delivered to observers but never stored in component state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub fields: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Value>,
}

impl ComponentUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Appends an event (builder style).
    pub fn with_event(mut self, event: impl Into<Value>) -> Self {
        self.events.push(event.into());
        self
    }

    /// True if the update carries neither fields nor events.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.events.is_empty()
    }
}

/// The component bundle of an entity about to be created.
pub type EntityTemplate = BTreeMap<ComponentKind, ComponentData>;

/// Identifies a command: a named operation exposed by a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandKind {
    pub component: ComponentKind,
    pub name: String,
}

impl CommandKind {
    pub fn new(component: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            component,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.component, self.name)
    }
}

/// An outbound command invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub kind: CommandKind,
    pub payload: Value,
}

impl CommandRequest {
    pub fn new(kind: CommandKind, payload: impl Into<Value>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}
