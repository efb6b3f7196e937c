//! The local view - this worker's cached projection of remote entities.
//!
//! The coordinator is the source of truth. The view is built and mutated
//! only by the [`Reconciler`](crate::reconciler::Reconciler); everything
//! else gets read-only access.

use crate::component::Component;
use std::collections::BTreeMap;
use worldsync_env::{Authority, ComponentData, ComponentKind, ComponentUpdate, EntityId};

/// Cached state of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    components: BTreeMap<ComponentKind, ComponentData>,

    /// Kept apart from `components` so authority may arrive before or
    /// after the component itself
    authority: BTreeMap<ComponentKind, Authority>,
}

impl EntityState {
    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentData> {
        self.components.get(&kind)
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentKind, &ComponentData)> {
        self.components.iter().map(|(kind, data)| (*kind, data))
    }

    pub fn component_kinds(&self) -> Vec<ComponentKind> {
        self.components.keys().copied().collect()
    }

    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.components.contains_key(&kind)
    }

    pub fn authority(&self, kind: ComponentKind) -> Authority {
        self.authority.get(&kind).copied().unwrap_or_default()
    }

    /// True if updates for `kind` may be sent by this worker.
    pub fn has_authority(&self, kind: ComponentKind) -> bool {
        self.authority(kind).can_write()
    }

    /// Components this worker may currently write.
    pub fn authoritative_components(&self) -> Vec<ComponentKind> {
        self.authority
            .iter()
            .filter(|(_, authority)| authority.can_write())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Decodes a typed component; `None` if absent or not decodable.
    pub fn read<C: Component>(&self) -> Option<C> {
        self.components.get(&C::KIND).and_then(|data| C::from_data(data).ok())
    }
}

/// Entity id → cached state.
#[derive(Debug, Clone, Default)]
pub struct LocalView {
    entities: BTreeMap<EntityId, EntityState>,
}

impl LocalView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&EntityState> {
        self.entities.get(&entity_id)
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity ids in ascending order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityState)> {
        self.entities.iter().map(|(id, state)| (*id, state))
    }

    pub fn component(&self, entity_id: EntityId, kind: ComponentKind) -> Option<&ComponentData> {
        self.get(entity_id).and_then(|e| e.component(kind))
    }

    pub fn read<C: Component>(&self, entity_id: EntityId) -> Option<C> {
        self.get(entity_id).and_then(|e| e.read::<C>())
    }

    pub fn authority(&self, entity_id: EntityId, kind: ComponentKind) -> Authority {
        self.get(entity_id).map(|e| e.authority(kind)).unwrap_or_default()
    }

    pub fn has_authority(&self, entity_id: EntityId, kind: ComponentKind) -> bool {
        self.authority(entity_id, kind).can_write()
    }

    /// Entities whose `kind` component this worker may write.
    pub fn authoritative_entities(&self, kind: ComponentKind) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, state)| state.has_authority(kind))
            .map(|(id, _)| id)
            .collect()
    }

    /// Entities with at least one component this worker may write.
    pub fn owned_entities(&self) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, state)| state.authority.values().any(Authority::can_write))
            .map(|(id, _)| id)
            .collect()
    }

    // Mutation, reconciler only

    /// Returns false if the entity was already present.
    pub(crate) fn add_entity(&mut self, entity_id: EntityId) -> bool {
        if self.entities.contains_key(&entity_id) {
            return false;
        }
        self.entities.insert(entity_id, EntityState::default());
        true
    }

    pub(crate) fn remove_entity(&mut self, entity_id: EntityId) -> bool {
        self.entities.remove(&entity_id).is_some()
    }

    pub(crate) fn add_component(&mut self, entity_id: EntityId, kind: ComponentKind, data: ComponentData) {
        self.entities
            .entry(entity_id)
            .or_default()
            .components
            .insert(kind, data);
    }

    pub(crate) fn remove_component(&mut self, entity_id: EntityId, kind: ComponentKind) -> bool {
        match self.entities.get_mut(&entity_id) {
            Some(state) => {
                state.authority.remove(&kind);
                state.components.remove(&kind).is_some()
            }
            None => false,
        }
    }

    /// Merges a partial update. Returns false if the component is unknown.
    pub(crate) fn update_component(&mut self, entity_id: EntityId, kind: ComponentKind, update: &ComponentUpdate) -> bool {
        match self
            .entities
            .get_mut(&entity_id)
            .and_then(|state| state.components.get_mut(&kind))
        {
            Some(data) => {
                data.apply(update);
                true
            }
            None => false,
        }
    }

    /// Returns false if the entity is unknown.
    pub(crate) fn set_authority(&mut self, entity_id: EntityId, kind: ComponentKind, authority: Authority) -> bool {
        match self.entities.get_mut(&entity_id) {
            Some(state) => {
                state.authority.insert(kind, authority);
                true
            }
            None => false,
        }
    }
}
