//! Game schema of the reference deployment: deer and hunters.
//!
//! | Component | Kind | Fields | Events / commands |
//! |---|---|---|---|
//! | `deer.Health` | 1001 | `remaining_health` | command `got_shot(Shot) → ShotResponse` |
//! | `deer.Dialogue` | 1002 | none | event `said_something { message }` |
//! | `hunter.Health` | 1003 | `health` | none |
//! | `hunter.Name` | 1004 | `first_name`, `last_name` | none |

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use worldsync_core::{
    ArchetypeConfig, Component, ConfigurationError, InterestRule, Position, QueryConstraint, WorkerConfig,
};
use worldsync_env::{CommandKind, CommandRequest, ComponentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeerHealth {
    pub remaining_health: u32,
}

impl Component for DeerHealth {
    const KIND: ComponentKind = ComponentKind(1001);
    const NAME: &'static str = "deer.Health";
}

impl DeerHealth {
    pub fn got_shot() -> CommandKind {
        CommandKind::new(Self::KIND, "got_shot")
    }
}

/// Carries events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeerDialogue {}

impl Component for DeerDialogue {
    const KIND: ComponentKind = ComponentKind(1002);
    const NAME: &'static str = "deer.Dialogue";
}

/// `deer.Dialogue` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaidSomething {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HunterHealth {
    pub health: u32,
}

impl Component for HunterHealth {
    const KIND: ComponentKind = ComponentKind(1003);
    const NAME: &'static str = "hunter.Health";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HunterName {
    pub first_name: String,
    pub last_name: String,
}

impl Component for HunterName {
    const KIND: ComponentKind = ComponentKind(1004);
    const NAME: &'static str = "hunter.Name";
}

/// `got_shot` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shot {
    pub damage: u32,
}

impl Shot {
    pub fn request(self) -> CommandRequest {
        CommandRequest::new(DeerHealth::got_shot(), serde_json::json!({ "damage": self.damage }))
    }

    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// `got_shot` response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotResponse {
    pub remaining_health: u32,
}

/// Damage of one hunter shot.
pub const SHOT_DAMAGE: u32 = 15;

/// Initial deer health.
pub const DEER_HEALTH: u32 = 100;

/// Where every reference entity spawns.
pub const SPAWN_POINT: Position = Position {
    x: 1.0,
    y: 2.0,
    z: 3.0,
};

/// Hunter interest sphere radius in meters.
pub const HUNTER_SIGHT: f64 = 2000.0;

/// Hunter interest refresh rate.
pub const HUNTER_INTEREST_HZ: f32 = 30.0;

fn data<C: Component>(component: &C) -> Result<worldsync_env::ComponentData, ConfigurationError> {
    component
        .to_data()
        .map_err(|e| ConfigurationError::Invalid(format!("cannot encode {}: {}", C::NAME, e)))
}

/// Deer: written by `simulation`, readable by every role.
pub fn deer_archetype() -> Result<ArchetypeConfig, ConfigurationError> {
    Ok(ArchetypeConfig::new("deer", "simulation", &["AI", "client", "simulation"])
        .with_component(Position::KIND, data(&SPAWN_POINT)?)
        .with_component(
            DeerHealth::KIND,
            data(&DeerHealth {
                remaining_health: DEER_HEALTH,
            })?,
        )
        .with_component(DeerDialogue::KIND, data(&DeerDialogue {})?))
}

/// Hunter: written by `AI`, with a sphere interest anchored on its name so
/// whoever renames the hunter also sees the deer around it.
pub fn hunter_archetype() -> Result<ArchetypeConfig, ConfigurationError> {
    Ok(ArchetypeConfig::new("hunter", "AI", &["AI", "client", "simulation"])
        .with_component(Position::KIND, data(&SPAWN_POINT)?)
        .with_component(HunterHealth::KIND, data(&HunterHealth { health: 444 })?)
        .with_component(
            HunterName::KIND,
            data(&HunterName {
                first_name: "Joshie".to_string(),
                last_name: "Hunter".to_string(),
            })?,
        )
        .with_interest(InterestRule {
            anchor: HunterName::KIND,
            constraints: vec![QueryConstraint::Sphere {
                center: Vector3::new(SPAWN_POINT.x, SPAWN_POINT.y, SPAWN_POINT.z),
                radius: HUNTER_SIGHT,
            }],
            result_components: vec![
                DeerHealth::KIND,
                DeerDialogue::KIND,
                Position::KIND,
                ComponentKind::ENTITY_ACL,
            ],
            frequency_hz: HUNTER_INTEREST_HZ,
        }))
}

fn with_schema(config: WorkerConfig) -> WorkerConfig {
    config
        .with_component(DeerHealth::KIND, DeerHealth::NAME)
        .with_component(DeerDialogue::KIND, DeerDialogue::NAME)
        .with_component(HunterHealth::KIND, HunterHealth::NAME)
        .with_component(HunterName::KIND, HunterName::NAME)
}

/// The spawning worker: `deer` instances of deer plus one hunter, ticking every 5 s.
pub fn managed_config(deer: u32) -> Result<WorkerConfig, ConfigurationError> {
    let config = with_schema(WorkerConfig::default())
        .with_worker_type("Managed")
        .with_attributes(&["simulation"])
        .with_archetype(deer_archetype()?)
        .with_archetype(hunter_archetype()?)
        .with_spawn("deer", deer)
        .with_spawn("hunter", 1);
    config.validate()?;
    Ok(config)
}

/// The hunting worker: owns hunters, ticking every 3 s.
pub fn hunter_config() -> Result<WorkerConfig, ConfigurationError> {
    let config = with_schema(WorkerConfig::default())
        .with_worker_type("myWorker")
        .with_attributes(&["AI"])
        .with_tick_interval(std::time::Duration::from_secs(3));
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deer_acl_written_by_simulation() {
        let acl = deer_archetype().unwrap().acl().unwrap();
        assert!(acl.can_write(DeerHealth::KIND, &["simulation"]));
        assert!(!acl.can_write(DeerHealth::KIND, &["AI"]));
        assert!(acl.can_read(&["client"]));
    }

    #[test]
    fn test_hunter_interest_on_name() {
        let hunter = hunter_archetype().unwrap();
        let interest = hunter.interest().unwrap();
        assert_eq!(interest.len(), 1);
        assert_eq!(interest[0].anchor, HunterName::KIND);

        let acl = hunter.acl().unwrap();
        assert!(acl.can_write(ComponentKind::INTEREST, &["AI"]));
        assert!(acl.can_write(HunterName::KIND, &["AI"]));
    }

    #[test]
    fn test_reference_configs_validate() {
        let managed = managed_config(3).unwrap();
        assert_eq!(managed.spawn.len(), 2);
        assert!(managed.registry().contains(DeerHealth::KIND));

        let hunter = hunter_config().unwrap();
        assert_eq!(hunter.tick_interval_ms, 3000);
        assert_eq!(hunter.attributes, vec!["AI".to_string()]);
    }

    #[test]
    fn test_shot_payload() {
        let request = Shot { damage: SHOT_DAMAGE }.request();
        assert_eq!(request.kind, DeerHealth::got_shot());
        assert_eq!(Shot::from_payload(&request.payload), Some(Shot { damage: 15 }));
    }
}
