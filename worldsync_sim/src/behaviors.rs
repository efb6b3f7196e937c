//! Reference worker behaviors.
//!
//! - [`ManagedBehavior`]: owns the deer, rerolls their health every tick.
//! - [`HunterBehavior`]: owns the hunters, renames them and shoots at
//!   everything it can see.
//! - [`handle_got_shot`]: the deer side of `got_shot`, run by the coordinator
//!   on behalf of whichever worker owns the deer.

use crate::coordinator::{CommandOutput, SimCoordinator};
use crate::schema::{DeerDialogue, DeerHealth, HunterName, SaidSomething, Shot, ShotResponse, DEER_HEALTH, SHOT_DAMAGE};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use worldsync_core::{Component, SyncBehavior, TickInput, Intents, ViewChange};
use worldsync_env::{ComponentUpdate, EntityId, EntityTemplate, LogLevel, StatusCode, WORKER_ID_CHARSET};

/// Timeout of one `got_shot` command.
pub const SHOT_TIMEOUT: Duration = Duration::from_millis(500);

fn random_characters(rng: &mut ChaCha8Rng, count: usize) -> String {
    (0..count)
        .map(|_| WORKER_ID_CHARSET[rng.gen_range(0..WORKER_ID_CHARSET.len())] as char)
        .collect()
}

/// The deer spawner.
///
/// Entities themselves come from the config's `spawn` section; this behavior
/// tracks how creation went and republishes a random health for every deer
/// it is authoritative over.
pub struct ManagedBehavior {
    rng: ChaCha8Rng,
    created: Vec<EntityId>,
    creation_failures: usize,
    health_updates: u64,
}

impl ManagedBehavior {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            created: Vec::new(),
            creation_failures: 0,
            health_updates: 0,
        }
    }

    /// Entities this worker created, in completion order.
    pub fn created(&self) -> &[EntityId] {
        &self.created
    }

    pub fn creation_failures(&self) -> usize {
        self.creation_failures
    }

    pub fn health_updates(&self) -> u64 {
        self.health_updates
    }
}

impl SyncBehavior for ManagedBehavior {
    fn on_start(&mut self, intents: &mut Intents) {
        intents.log(LogLevel::Info, "Connected successfully");
    }

    fn plan(&mut self, input: &TickInput<'_>, intents: &mut Intents) {
        for outcome in input.creations {
            match &outcome.result {
                Ok(entity_id) => self.created.push(*entity_id),
                Err(e) => {
                    self.creation_failures += 1;
                    warn!("{} failed: {}", outcome.handle, e);
                }
            }
        }

        for entity_id in input.view.authoritative_entities(DeerHealth::KIND) {
            let health = self.rng.gen_range(0..=DEER_HEALTH);
            debug!("Updating entity {} health to {}", entity_id, health);
            intents.update(
                entity_id,
                DeerHealth::KIND,
                ComponentUpdate::new().with_field("remaining_health", health),
            );
            self.health_updates += 1;
        }
    }

    fn on_disconnect(&mut self, reason: &str) {
        info!("Managed worker stopping after {} entities: {}", self.created.len(), reason);
    }
}

/// Counters kept by [`HunterBehavior`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HuntStats {
    pub renames: u64,
    pub shots_fired: u64,
    pub hits: u64,
    pub timeouts: u64,
    pub rejected: u64,
    pub dialogue_events: u64,
    pub health_events: u64,
}

/// The hunting worker.
pub struct HunterBehavior {
    rng: ChaCha8Rng,
    damage: u32,
    timeout: Duration,
    stats: HuntStats,
    dialogue: Vec<(EntityId, String)>,
}

impl HunterBehavior {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            damage: SHOT_DAMAGE,
            timeout: SHOT_TIMEOUT,
            stats: HuntStats::default(),
            dialogue: Vec::new(),
        }
    }

    pub fn with_damage(mut self, damage: u32) -> Self {
        self.damage = damage;
        self
    }

    pub fn stats(&self) -> HuntStats {
        self.stats
    }

    /// Every `said_something` heard so far.
    pub fn dialogue(&self) -> &[(EntityId, String)] {
        &self.dialogue
    }

    fn observe(&mut self, input: &TickInput<'_>) {
        for change in input.changes {
            let ViewChange::ComponentUpdated {
                entity_id,
                component,
                events,
            } = change
            else {
                continue;
            };

            if *component == DeerDialogue::KIND {
                for event in events {
                    match serde_json::from_value::<SaidSomething>(event.clone()) {
                        Ok(said) => {
                            info!("Deer {} dialogue event: {}", entity_id, said.message);
                            self.stats.dialogue_events += 1;
                            self.dialogue.push((*entity_id, said.message));
                        }
                        Err(e) => warn!("Undecodable dialogue event on {}: {}", entity_id, e),
                    }
                }
            } else if *component == DeerHealth::KIND {
                if let Some(health) = input.view.read::<DeerHealth>(*entity_id) {
                    info!("Deer {} health event: {}", entity_id, health.remaining_health);
                    self.stats.health_events += 1;
                }
            }
        }

        for resolution in input.commands {
            match &resolution.result {
                Ok(result) => {
                    self.stats.hits += 1;
                    let remaining = result
                        .response
                        .clone()
                        .and_then(|r| serde_json::from_value::<ShotResponse>(r).ok())
                        .map(|r| r.remaining_health);
                    debug!("Received response for command {}: {:?}", resolution.request_id, remaining);
                }
                Err(e) if e.is_timeout() => self.stats.timeouts += 1,
                Err(e) => {
                    self.stats.rejected += 1;
                    debug!("{}", e);
                }
            }
        }
    }
}

impl SyncBehavior for HunterBehavior {
    fn on_start(&mut self, intents: &mut Intents) {
        intents.log(LogLevel::Info, "Connected successfully");
    }

    fn plan(&mut self, input: &TickInput<'_>, intents: &mut Intents) {
        self.observe(input);

        for entity_id in input.view.authoritative_entities(HunterName::KIND) {
            let first_name = random_characters(&mut self.rng, 5);
            let last_name = random_characters(&mut self.rng, 8);
            debug!("Renaming hunter {} to {} {}", entity_id, first_name, last_name);
            intents.update(
                entity_id,
                HunterName::KIND,
                ComponentUpdate::new()
                    .with_field("first_name", first_name)
                    .with_field("last_name", last_name),
            );
            self.stats.renames += 1;
        }

        for entity_id in input.view.entities() {
            intents.command(entity_id, Shot { damage: self.damage }.request(), Some(self.timeout));
            self.stats.shots_fired += 1;
        }
    }
}

/// Applies a shot to a deer: health drops by the damage and the deer says something.
pub fn handle_got_shot(components: &EntityTemplate, payload: &Value) -> Result<CommandOutput, (StatusCode, String)> {
    let shot = Shot::from_payload(payload)
        .ok_or_else(|| (StatusCode::ApplicationError, format!("malformed Shot: {}", payload)))?;
    let health = components
        .get(&DeerHealth::KIND)
        .and_then(|data| DeerHealth::from_data(data).ok())
        .ok_or_else(|| (StatusCode::NotFound, "not a deer".to_string()))?;

    let remaining_health = health.remaining_health.saturating_sub(shot.damage);
    let message = if remaining_health == 0 {
        "I have fallen".to_string()
    } else {
        format!("Ouch, {} health left", remaining_health)
    };

    let response = serde_json::to_value(ShotResponse { remaining_health })
        .map_err(|e| (StatusCode::InternalError, e.to_string()))?;
    let said = serde_json::to_value(SaidSomething { message })
        .map_err(|e| (StatusCode::InternalError, e.to_string()))?;

    Ok(CommandOutput {
        response,
        updates: vec![
            (
                DeerHealth::KIND,
                ComponentUpdate::new().with_field("remaining_health", remaining_health),
            ),
            (DeerDialogue::KIND, ComponentUpdate::new().with_event(said)),
        ],
    })
}

/// Registers the deer command handlers.
pub fn register_deer_handlers(coordinator: &SimCoordinator) {
    coordinator.register_handler(DeerHealth::got_shot(), Box::new(handle_got_shot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HunterHealth, SPAWN_POINT};
    use rand::SeedableRng;
    use worldsync_core::{ComponentRegistry, Intent, LocalView, Position, Reconciler};
    use worldsync_env::{Authority, ComponentData, EventBatch, WorkerEvent};

    fn registry() -> ComponentRegistry {
        ComponentRegistry::new()
            .with::<DeerHealth>()
            .with::<DeerDialogue>()
            .with::<HunterHealth>()
            .with::<HunterName>()
    }

    fn add(entity_id: i64, kind: worldsync_env::ComponentKind, data: ComponentData) -> Vec<WorkerEvent> {
        vec![
            WorkerEvent::AddEntity {
                entity_id: EntityId(entity_id),
            },
            WorkerEvent::AddComponent {
                entity_id: EntityId(entity_id),
                component: kind,
                data,
            },
        ]
    }

    fn owned(entity_id: i64, kind: worldsync_env::ComponentKind) -> WorkerEvent {
        WorkerEvent::AuthorityChange {
            entity_id: EntityId(entity_id),
            component: kind,
            authority: Authority::Authoritative,
        }
    }

    fn view_from(events: Vec<WorkerEvent>) -> (Reconciler, LocalView) {
        let mut reconciler = Reconciler::new(registry());
        let mut view = LocalView::new();
        reconciler.ingest(&mut view, EventBatch::from(events));
        (reconciler, view)
    }

    fn input<'a>(view: &'a LocalView, changes: &'a [ViewChange]) -> TickInput<'a> {
        TickInput {
            tick: 1,
            now: Duration::ZERO,
            view,
            changes,
            creations: &[],
            commands: &[],
        }
    }

    fn deer_data(health: u32) -> ComponentData {
        DeerHealth {
            remaining_health: health,
        }
        .to_data()
        .unwrap()
    }

    #[test]
    fn test_managed_updates_only_owned_deer() {
        let mut events = add(1, DeerHealth::KIND, deer_data(100));
        events.extend(add(2, DeerHealth::KIND, deer_data(100)));
        events.push(owned(1, DeerHealth::KIND));
        let (_, view) = view_from(events);

        let mut behavior = ManagedBehavior::new(ChaCha8Rng::seed_from_u64(1));
        let mut intents = Intents::new();
        behavior.plan(&input(&view, &[]), &mut intents);

        assert_eq!(intents.len(), 1);
        match intents.iter().next() {
            Some(Intent::Update {
                entity_id,
                component,
                update,
            }) => {
                assert_eq!(*entity_id, EntityId(1));
                assert_eq!(*component, DeerHealth::KIND);
                let health = update.fields["remaining_health"].as_u64().unwrap();
                assert!(health <= u64::from(DEER_HEALTH));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(behavior.health_updates(), 1);
    }

    #[test]
    fn test_hunter_renames_owned_and_shoots_everything() {
        let name = HunterName {
            first_name: "Joshie".into(),
            last_name: "Hunter".into(),
        };
        let mut events = add(1, HunterName::KIND, name.to_data().unwrap());
        events.push(owned(1, HunterName::KIND));
        events.extend(add(2, DeerHealth::KIND, deer_data(100)));
        events.extend(add(3, Position::KIND, SPAWN_POINT.to_data().unwrap()));
        let (_, view) = view_from(events);

        let mut behavior = HunterBehavior::new(ChaCha8Rng::seed_from_u64(7));
        let mut intents = Intents::new();
        behavior.plan(&input(&view, &[]), &mut intents);

        let renames: Vec<_> = intents
            .iter()
            .filter_map(|i| match i {
                Intent::Update { entity_id, update, .. } => Some((*entity_id, update.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].0, EntityId(1));
        assert_eq!(renames[0].1.fields["first_name"].as_str().unwrap().len(), 5);
        assert_eq!(renames[0].1.fields["last_name"].as_str().unwrap().len(), 8);

        let shots: Vec<_> = intents
            .iter()
            .filter_map(|i| match i {
                Intent::Command {
                    entity_id,
                    command,
                    timeout,
                } => Some((*entity_id, command.clone(), *timeout)),
                _ => None,
            })
            .collect();
        assert_eq!(shots.len(), 3);
        assert!(shots
            .iter()
            .all(|(_, command, timeout)| command.kind == DeerHealth::got_shot() && *timeout == Some(SHOT_TIMEOUT)));
        assert_eq!(Shot::from_payload(&shots[0].1.payload), Some(Shot { damage: 15 }));
    }

    #[test]
    fn test_hunter_logs_dialogue_events() {
        let (mut reconciler, mut view) = view_from(add(2, DeerDialogue::KIND, ComponentData::new()));
        let ingested = reconciler.ingest(
            &mut view,
            EventBatch::from(vec![WorkerEvent::ComponentUpdate {
                entity_id: EntityId(2),
                component: DeerDialogue::KIND,
                update: ComponentUpdate::new().with_event(serde_json::json!({ "message": "hello" })),
            }]),
        );

        let mut behavior = HunterBehavior::new(ChaCha8Rng::seed_from_u64(7));
        let mut intents = Intents::new();
        behavior.plan(&input(&view, &ingested.changes), &mut intents);

        assert_eq!(behavior.dialogue(), &[(EntityId(2), "hello".to_string())]);
        assert_eq!(behavior.stats().dialogue_events, 1);
    }

    #[test]
    fn test_got_shot_reduces_health() {
        let mut components = EntityTemplate::new();
        components.insert(DeerHealth::KIND, deer_data(100));

        let output = handle_got_shot(&components, &Shot { damage: 15 }.request().payload).unwrap();

        assert_eq!(output.response, serde_json::json!({ "remaining_health": 85 }));
        assert_eq!(output.updates.len(), 2);
        assert_eq!(output.updates[0].1.fields["remaining_health"], Value::from(85));
        assert_eq!(output.updates[1].0, DeerDialogue::KIND);
        assert_eq!(output.updates[1].1.events.len(), 1);
    }

    #[test]
    fn test_got_shot_saturates_and_rejects_non_deer() {
        let mut components = EntityTemplate::new();
        components.insert(DeerHealth::KIND, deer_data(10));
        let output = handle_got_shot(&components, &serde_json::json!({ "damage": 15 })).unwrap();
        assert_eq!(output.response, serde_json::json!({ "remaining_health": 0 }));

        let err = handle_got_shot(&EntityTemplate::new(), &serde_json::json!({ "damage": 15 })).unwrap_err();
        assert_eq!(err.0, StatusCode::NotFound);

        let err = handle_got_shot(&components, &serde_json::json!("bang")).unwrap_err();
        assert_eq!(err.0, StatusCode::ApplicationError);
    }
}
