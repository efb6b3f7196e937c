//! The "AUTHORITY" Policy - read/write requirement sets from worker roles.
//!
//! A worker declares a list of attributes when it connects. Access to an
//! entity is expressed as [`RequirementSet`]s: a disjunction of
//! [`AttributeSet`]s, each of which is a conjunction of attributes.
//!
//! ```text
//! RequirementSet = [ {simulation} , {ai} , {client} ]
//!                        OR           OR
//! caller attrs  = [ai, physics]  -> satisfies {ai}
//! ```
//!
//! [`compute_acl`] grants one writer role exclusive write authority over a
//! list of components and any one of the reader roles read access.

use crate::component::Component;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldsync_env::ComponentKind;

/// A role tag a worker declares about itself (e.g. "simulation", "AI").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribute(pub String);

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered conjunction of attributes. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(Vec<Attribute>);

impl AttributeSet {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self(attributes)
    }

    /// A set holding exactly one attribute.
    pub fn single(attribute: Attribute) -> Self {
        Self(vec![attribute])
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.0
    }

    /// True if every attribute in the set is among `declared`.
    pub fn is_satisfied_by<S: AsRef<str>>(&self, declared: &[S]) -> bool {
        self.0
            .iter()
            .all(|needed| declared.iter().any(|have| have.as_ref() == needed.as_str()))
    }
}

/// Disjunction of attribute sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementSet(Vec<AttributeSet>);

impl RequirementSet {
    pub fn new(sets: Vec<AttributeSet>) -> Self {
        Self(sets)
    }

    pub fn attribute_sets(&self) -> &[AttributeSet] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any one attribute set is satisfied. An empty requirement set
    /// is satisfied by nobody.
    pub fn is_satisfied_by<S: AsRef<str>>(&self, declared: &[S]) -> bool {
        self.0.iter().any(|set| set.is_satisfied_by(declared))
    }
}

/// The access control list carried by every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAcl {
    /// Who may observe the entity
    pub read: RequirementSet,

    /// Who may write each component (exactly one set per component)
    pub component_write: BTreeMap<ComponentKind, RequirementSet>,
}

impl EntityAcl {
    pub fn can_read<S: AsRef<str>>(&self, declared: &[S]) -> bool {
        self.read.is_satisfied_by(declared)
    }

    pub fn can_write<S: AsRef<str>>(&self, component: ComponentKind, declared: &[S]) -> bool {
        self.component_write
            .get(&component)
            .map(|set| set.is_satisfied_by(declared))
            .unwrap_or(false)
    }

    /// Write requirement for a component, if the ACL covers it.
    pub fn writer_of(&self, component: ComponentKind) -> Option<&RequirementSet> {
        self.component_write.get(&component)
    }

    pub fn covers(&self, component: ComponentKind) -> bool {
        self.component_write.contains_key(&component)
    }
}

impl Component for EntityAcl {
    const KIND: ComponentKind = ComponentKind::ENTITY_ACL;
    const NAME: &'static str = "EntityAcl";
}

/// Computes the ACL for an entity.
///
/// # Arguments
/// * `writer` - role granted exclusive write authority over every component
/// * `readers` - roles any one of which may read the entity (non-empty)
/// * `components` - components the writer is granted authority over
///
/// # Errors
/// * `EmptyReaderRoles` - no reader roles; the read set would be unsatisfiable
/// * `EmptyComponentSet` - nothing to grant write authority over
pub fn compute_acl(
    writer: &Attribute,
    readers: &[Attribute],
    components: &[ComponentKind],
) -> Result<EntityAcl, ConfigurationError> {
    if readers.is_empty() {
        return Err(ConfigurationError::EmptyReaderRoles);
    }
    if components.is_empty() {
        return Err(ConfigurationError::EmptyComponentSet);
    }

    let mut read_sets: Vec<AttributeSet> = Vec::with_capacity(readers.len());
    for reader in readers {
        let set = AttributeSet::single(reader.clone());
        if !read_sets.contains(&set) {
            read_sets.push(set);
        }
    }

    let writer_set = RequirementSet::new(vec![AttributeSet::single(writer.clone())]);
    let component_write = components
        .iter()
        .map(|kind| (*kind, writer_set.clone()))
        .collect();

    Ok(EntityAcl {
        read: RequirementSet::new(read_sets),
        component_write,
    })
}
