//! The Reconciler - folds the incoming event stream into the [`LocalView`].
//!
//! # Ordering
//!
//! Events of one batch are applied strictly in delivery order. Nothing is
//! reordered or coalesced, so a remove followed by an add of the same
//! entity within one batch leaves the entity present.
//!
//! # Output
//!
//! ```text
//!   EventBatch ──► Reconciler ──► LocalView (mutated)
//!                      │
//!                      ├──► Vec<ViewChange>   (what changed, in order)
//!                      └──► Vec<WorkerEvent>  (responses, logs, disconnects)
//! ```
//!
//! Observers consume [`ViewChange`]s instead of registering callbacks.

use crate::registry::ComponentRegistry;
use crate::view::LocalView;
use serde_json::Value;
use tracing::{debug, trace, warn};
use worldsync_env::{Authority, ComponentKind, EntityId, EventBatch, WorkerEvent};

/// One observable change to the local view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    EntityAdded(EntityId),
    EntityRemoved(EntityId),
    ComponentAdded {
        entity_id: EntityId,
        component: ComponentKind,
    },
    /// A partial update was merged; `events` are the transient events it carried
    ComponentUpdated {
        entity_id: EntityId,
        component: ComponentKind,
        events: Vec<Value>,
    },
    ComponentRemoved {
        entity_id: EntityId,
        component: ComponentKind,
    },
    AuthorityChanged {
        entity_id: EntityId,
        component: ComponentKind,
        authority: Authority,
    },
}

/// Result of ingesting one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingested {
    pub changes: Vec<ViewChange>,

    /// Non-state events, in delivery order
    pub forwarded: Vec<WorkerEvent>,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// State events that changed the view
    pub applied: u64,
    /// Events for unregistered component kinds
    pub ignored: u64,
    /// Events referring to entities or components not in the view
    pub dropped: u64,
}

/// Applies state events to a view.
#[derive(Debug, Clone)]
pub struct Reconciler {
    registry: ComponentRegistry,
    stats: ReconcilerStats,
}

impl Reconciler {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry,
            stats: ReconcilerStats::default(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    /// Ingests a whole batch in order.
    pub fn ingest(&mut self, view: &mut LocalView, batch: EventBatch) -> Ingested {
        let mut ingested = Ingested::default();
        for event in batch {
            if event.is_state_event() {
                self.apply(view, event, &mut ingested.changes);
            } else {
                ingested.forwarded.push(event);
            }
        }
        ingested
    }

    /// Applies a single state event. Non-state events are ignored.
    pub fn apply(&mut self, view: &mut LocalView, event: WorkerEvent, changes: &mut Vec<ViewChange>) {
        match event {
            WorkerEvent::AddEntity { entity_id } => {
                if view.add_entity(entity_id) {
                    self.stats.applied += 1;
                    changes.push(ViewChange::EntityAdded(entity_id));
                } else {
                    debug!("Entity {} already in view", entity_id);
                }
            }
            WorkerEvent::RemoveEntity { entity_id } => {
                if view.remove_entity(entity_id) {
                    self.stats.applied += 1;
                    changes.push(ViewChange::EntityRemoved(entity_id));
                } else {
                    self.drop_event("remove", entity_id, None);
                }
            }
            WorkerEvent::AddComponent {
                entity_id,
                component,
                data,
            } => {
                if !self.is_tracked(component) {
                    return;
                }
                if view.add_entity(entity_id) {
                    changes.push(ViewChange::EntityAdded(entity_id));
                }
                view.add_component(entity_id, component, data);
                self.stats.applied += 1;
                changes.push(ViewChange::ComponentAdded { entity_id, component });
            }
            WorkerEvent::RemoveComponent { entity_id, component } => {
                if !self.is_tracked(component) {
                    return;
                }
                if view.remove_component(entity_id, component) {
                    self.stats.applied += 1;
                    changes.push(ViewChange::ComponentRemoved { entity_id, component });
                } else {
                    self.drop_event("component removal", entity_id, Some(component));
                }
            }
            WorkerEvent::ComponentUpdate {
                entity_id,
                component,
                update,
            } => {
                if !self.is_tracked(component) {
                    return;
                }
                if view.update_component(entity_id, component, &update) {
                    self.stats.applied += 1;
                    changes.push(ViewChange::ComponentUpdated {
                        entity_id,
                        component,
                        events: update.events,
                    });
                } else {
                    self.drop_event("update", entity_id, Some(component));
                }
            }
            WorkerEvent::AuthorityChange {
                entity_id,
                component,
                authority,
            } => {
                if !self.is_tracked(component) {
                    return;
                }
                if view.set_authority(entity_id, component, authority) {
                    self.stats.applied += 1;
                    debug!("Authority over {} on entity {}: {:?}", component, entity_id, authority);
                    changes.push(ViewChange::AuthorityChanged {
                        entity_id,
                        component,
                        authority,
                    });
                } else {
                    self.drop_event("authority change", entity_id, Some(component));
                }
            }
            other => trace!("Not a state event: {:?}", other),
        }
    }

    fn is_tracked(&mut self, component: ComponentKind) -> bool {
        if self.registry.contains(component) {
            true
        } else {
            self.stats.ignored += 1;
            trace!("Ignoring unregistered {}", component);
            false
        }
    }

    fn drop_event(&mut self, what: &str, entity_id: EntityId, component: Option<ComponentKind>) {
        self.stats.dropped += 1;
        match component {
            Some(kind) => warn!("Dropping {} for {} on unknown entity/component {}", what, kind, entity_id),
            None => warn!("Dropping {} for unknown entity {}", what, entity_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use worldsync_env::{ComponentData, ComponentUpdate, StatusCode};

    const HEALTH: ComponentKind = ComponentKind(1001);

    fn reconciler() -> Reconciler {
        let mut registry = ComponentRegistry::new();
        registry.register(HEALTH, "Health");
        Reconciler::new(registry)
    }

    fn add_health(entity: i64, health: i64, name: &str) -> WorkerEvent {
        WorkerEvent::AddComponent {
            entity_id: EntityId(entity),
            component: HEALTH,
            data: ComponentData::new()
                .with_field("remaining_health", health)
                .with_field("name", name),
        }
    }

    fn update(entity: i64, update: ComponentUpdate) -> WorkerEvent {
        WorkerEvent::ComponentUpdate {
            entity_id: EntityId(entity),
            component: HEALTH,
            update,
        }
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        r.ingest(
            &mut view,
            vec![
                add_health(1, 100, "deer"),
                update(1, ComponentUpdate::new().with_field("remaining_health", 42)),
            ]
            .into(),
        );

        let data = view.component(EntityId(1), HEALTH).unwrap();
        assert_eq!(data.field("remaining_health"), Some(&Value::from(42)));
        assert_eq!(data.field("name"), Some(&Value::from("deer")));
    }

    #[test]
    fn test_add_component_implies_entity() {
        let mut view = LocalView::new();
        let ingested = reconciler().ingest(&mut view, vec![add_health(7, 10, "a")].into());

        assert!(view.contains(EntityId(7)));
        assert_eq!(
            ingested.changes,
            vec![
                ViewChange::EntityAdded(EntityId(7)),
                ViewChange::ComponentAdded {
                    entity_id: EntityId(7),
                    component: HEALTH
                },
            ]
        );
    }

    #[test]
    fn test_delivery_order_is_preserved() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        r.ingest(
            &mut view,
            vec![
                add_health(1, 1, "a"),
                WorkerEvent::RemoveEntity { entity_id: EntityId(1) },
                WorkerEvent::AddEntity { entity_id: EntityId(1) },
            ]
            .into(),
        );

        assert!(view.contains(EntityId(1)));
        assert!(view.component(EntityId(1), HEALTH).is_none());
    }

    #[test]
    fn test_unregistered_component_ignored() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        let ingested = r.ingest(
            &mut view,
            vec![WorkerEvent::AddComponent {
                entity_id: EntityId(1),
                component: ComponentKind(9999),
                data: ComponentData::new(),
            }]
            .into(),
        );

        assert!(ingested.changes.is_empty());
        assert!(view.is_empty());
        assert_eq!(r.stats().ignored, 1);
    }

    #[test]
    fn test_update_for_unknown_entity_dropped() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        let ingested = r.ingest(
            &mut view,
            vec![update(5, ComponentUpdate::new().with_field("remaining_health", 1))].into(),
        );

        assert!(ingested.changes.is_empty());
        assert!(view.is_empty());
        assert_eq!(r.stats().dropped, 1);
    }

    #[test]
    fn test_authority_independent_of_component_arrival() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        r.ingest(
            &mut view,
            vec![
                WorkerEvent::AddEntity { entity_id: EntityId(3) },
                WorkerEvent::AuthorityChange {
                    entity_id: EntityId(3),
                    component: HEALTH,
                    authority: Authority::Authoritative,
                },
            ]
            .into(),
        );
        assert!(view.has_authority(EntityId(3), HEALTH));
        assert!(view.component(EntityId(3), HEALTH).is_none());

        r.ingest(&mut view, vec![add_health(3, 5, "late")].into());
        assert!(view.has_authority(EntityId(3), HEALTH));
        assert_eq!(view.authoritative_entities(HEALTH), vec![EntityId(3)]);

        r.ingest(
            &mut view,
            vec![WorkerEvent::AuthorityChange {
                entity_id: EntityId(3),
                component: HEALTH,
                authority: Authority::AuthorityLossImminent,
            }]
            .into(),
        );
        assert!(view.has_authority(EntityId(3), HEALTH));

        r.ingest(
            &mut view,
            vec![WorkerEvent::AuthorityChange {
                entity_id: EntityId(3),
                component: HEALTH,
                authority: Authority::NotAuthoritative,
            }]
            .into(),
        );
        assert!(view.owned_entities().is_empty());
    }

    #[test]
    fn test_non_state_events_forwarded_in_order() {
        let mut view = LocalView::new();
        let response = WorkerEvent::CommandResponse {
            request_id: worldsync_env::RequestId(1),
            entity_id: EntityId(1),
            status: StatusCode::Success,
            message: String::new(),
            response: None,
        };
        let disconnect = WorkerEvent::Disconnect {
            reason: "bye".to_string(),
        };

        let ingested = reconciler().ingest(
            &mut view,
            vec![response.clone(), add_health(1, 1, "a"), disconnect.clone()].into(),
        );

        assert_eq!(ingested.forwarded, vec![response, disconnect]);
        assert!(view.contains(EntityId(1)));
    }

    #[test]
    fn test_update_events_surface_in_changes() {
        let mut view = LocalView::new();
        let mut r = reconciler();
        let ingested = r.ingest(
            &mut view,
            vec![
                add_health(1, 100, "deer"),
                update(1, ComponentUpdate::new().with_event("ouch")),
            ]
            .into(),
        );

        assert_eq!(
            ingested.changes.last(),
            Some(&ViewChange::ComponentUpdated {
                entity_id: EntityId(1),
                component: HEALTH,
                events: vec![Value::from("ouch")],
            })
        );
        // Events are not stored
        assert_eq!(view.component(EntityId(1), HEALTH).unwrap().fields.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_partial_update_idempotent(
            base in proptest::collection::btree_map("[a-d]", 0i64..100, 0..4),
            patch in proptest::collection::btree_map("[a-f]", 0i64..100, 0..4),
        ) {
            let add = WorkerEvent::AddComponent {
                entity_id: EntityId(1),
                component: HEALTH,
                data: ComponentData {
                    fields: base.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect(),
                },
            };
            let patch = ComponentUpdate {
                fields: patch.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect(),
                events: Vec::new(),
            };

            let mut once = LocalView::new();
            let mut twice = LocalView::new();
            let mut r = reconciler();
            r.ingest(&mut once, vec![add.clone(), update(1, patch.clone())].into());
            r.ingest(&mut twice, vec![add, update(1, patch.clone()), update(1, patch.clone())].into());

            let once = once.component(EntityId(1), HEALTH).unwrap().clone();
            prop_assert_eq!(&once, twice.component(EntityId(1), HEALTH).unwrap());

            for (name, value) in &patch.fields {
                prop_assert_eq!(once.field(name), Some(value));
            }
            for (name, value) in &base {
                if !patch.fields.contains_key(name) {
                    prop_assert_eq!(once.field(name), Some(&Value::from(*value)));
                }
            }
        }
    }
}
