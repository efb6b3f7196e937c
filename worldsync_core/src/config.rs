//! Worker configuration.
//!
//! One [`WorkerConfig`] parameterises every worker variant: the variants
//! differ only in data (attributes, timings, archetypes), never in code.
//!
//! # Example
//!
//! ```json
//! {
//!   "worker_type": "Managed",
//!   "attributes": ["simulation"],
//!   "tick_interval_ms": 5000,
//!   "archetypes": [{
//!     "name": "deer",
//!     "writer": "simulation",
//!     "readers": ["AI", "client"],
//!     "components": { "54": { "x": 1.0, "y": 2.0, "z": 3.0 } }
//!   }],
//!   "spawn": [{ "archetype": "deer", "count": 1 }]
//! }
//! ```

use crate::acl::{compute_acl, Attribute, EntityAcl};
use crate::error::ConfigurationError;
use crate::interest::{build_interest, InterestDescriptor, QueryConstraint};
use crate::registry::{ComponentRegistry, ComponentEntry};
use crate::template::CreationRequest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use worldsync_env::{ComponentData, ComponentKind, EntityTemplate};

/// Configuration for one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker type, used as the worker id prefix (default: "Managed")
    pub worker_type: String,

    /// Attributes declared on connect (default: ["simulation"])
    pub attributes: Vec<String>,

    /// Sleep between ticks (default: 5000)
    pub tick_interval_ms: u64,

    /// Maximum wait for one event batch (default: 100)
    pub poll_timeout_ms: u64,

    /// Entity id reservation timeout (default: 500)
    pub reservation_timeout_ms: u64,

    /// Entity creation timeout (default: 500)
    pub creation_timeout_ms: u64,

    /// Default command timeout (default: 500)
    pub command_timeout_ms: u64,

    /// Component kinds tracked in addition to the well-known ones
    pub components: Vec<ComponentEntry>,

    /// Named entity shapes this worker can spawn
    pub archetypes: Vec<ArchetypeConfig>,

    /// Entities created at startup
    pub spawn: Vec<SpawnConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_type: "Managed".to_string(),
            attributes: vec!["simulation".to_string()],
            tick_interval_ms: 5000,
            poll_timeout_ms: 100,
            reservation_timeout_ms: 500,
            creation_timeout_ms: 500,
            command_timeout_ms: 500,
            components: Vec::new(),
            archetypes: Vec::new(),
            spawn: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Invalid(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn with_worker_type(mut self, worker_type: impl Into<String>) -> Self {
        self.worker_type = worker_type.into();
        self
    }

    pub fn with_attributes(mut self, attributes: &[&str]) -> Self {
        self.attributes = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = millis(interval);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = millis(timeout);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = millis(timeout);
        self
    }

    pub fn with_component(mut self, kind: ComponentKind, name: impl Into<String>) -> Self {
        self.components.push(ComponentEntry {
            kind,
            name: name.into(),
        });
        self
    }

    pub fn with_archetype(mut self, archetype: ArchetypeConfig) -> Self {
        self.archetypes.push(archetype);
        self
    }

    pub fn with_spawn(mut self, archetype: impl Into<String>, count: u32) -> Self {
        self.spawn.push(SpawnConfig {
            archetype: archetype.into(),
            count,
        });
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    pub fn creation_timeout(&self) -> Duration {
        Duration::from_millis(self.creation_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Well-known kinds plus the configured ones.
    pub fn registry(&self) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for entry in &self.components {
            registry.register(entry.kind, entry.name.clone());
        }
        registry
    }

    pub fn archetype(&self, name: &str) -> Option<&ArchetypeConfig> {
        self.archetypes.iter().find(|a| a.name == name)
    }

    /// Rejects configs that could only fail later, at request time.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.worker_type.is_empty() {
            return Err(ConfigurationError::Invalid("worker_type must not be empty".to_string()));
        }
        if self.attributes.is_empty() {
            return Err(ConfigurationError::Invalid(
                "a worker must declare at least one attribute".to_string(),
            ));
        }
        if [
            self.poll_timeout_ms,
            self.reservation_timeout_ms,
            self.creation_timeout_ms,
            self.command_timeout_ms,
        ]
        .contains(&0)
        {
            return Err(ConfigurationError::ZeroTimeout);
        }

        for archetype in &self.archetypes {
            archetype.creation_request()?;
        }
        for spawn in &self.spawn {
            if self.archetype(&spawn.archetype).is_none() {
                return Err(ConfigurationError::UnknownArchetype(spawn.archetype.clone()));
            }
        }
        Ok(())
    }
}

/// A named entity shape: initial components, authority policy and interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeConfig {
    pub name: String,

    /// Attribute granted write authority over every component
    pub writer: String,

    /// Attributes any one of which may read the entity
    pub readers: Vec<String>,

    /// Initial component values
    pub components: EntityTemplate,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interest: Vec<InterestRule>,
}

impl ArchetypeConfig {
    pub fn new(name: impl Into<String>, writer: impl Into<String>, readers: &[&str]) -> Self {
        Self {
            name: name.into(),
            writer: writer.into(),
            readers: readers.iter().map(|r| r.to_string()).collect(),
            components: EntityTemplate::new(),
            interest: Vec::new(),
        }
    }

    pub fn with_component(mut self, kind: ComponentKind, data: ComponentData) -> Self {
        self.components.insert(kind, data);
        self
    }

    pub fn with_interest(mut self, rule: InterestRule) -> Self {
        self.interest.push(rule);
        self
    }

    /// Components the writer is granted authority over: the initial ones,
    /// the ACL itself and, when declared, the interest component.
    pub fn written_components(&self) -> Vec<ComponentKind> {
        let mut kinds: Vec<ComponentKind> = self.components.keys().copied().collect();
        kinds.push(ComponentKind::ENTITY_ACL);
        if !self.interest.is_empty() {
            kinds.push(ComponentKind::INTEREST);
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn acl(&self) -> Result<EntityAcl, ConfigurationError> {
        let readers: Vec<Attribute> = self.readers.iter().map(Attribute::new).collect();
        compute_acl(&Attribute::new(self.writer.clone()), &readers, &self.written_components())
    }

    pub fn interest(&self) -> Result<Vec<InterestDescriptor>, ConfigurationError> {
        self.interest
            .iter()
            .map(|rule| {
                build_interest(
                    rule.anchor,
                    rule.constraints.clone(),
                    &rule.result_components,
                    rule.frequency_hz,
                )
            })
            .collect()
    }

    /// Validated creation request for one instance.
    pub fn creation_request(&self) -> Result<CreationRequest, ConfigurationError> {
        let mut request = CreationRequest::new(self.components.clone(), self.acl()?);
        for descriptor in self.interest()? {
            request = request.with_interest(descriptor);
        }
        request.assemble()?;
        Ok(request)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Interest declared on an archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRule {
    pub anchor: ComponentKind,
    pub constraints: Vec<QueryConstraint>,

    /// Empty means every component of each match
    #[serde(default)]
    pub result_components: Vec<ComponentKind>,

    pub frequency_hz: f32,
}

/// Startup spawn of `count` instances of an archetype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub archetype: String,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Position};
    use nalgebra::Vector3;

    fn deer() -> ArchetypeConfig {
        ArchetypeConfig::new("deer", "simulation", &["AI", "client"])
            .with_component(ComponentKind::POSITION, Position::new(1.0, 2.0, 3.0).to_data().unwrap())
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker_type, "Managed");
        assert_eq!(config.poll_timeout(), Duration::from_millis(100));
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "worker_type": "myWorker",
                "tick_interval_ms": 3000,
                "components": [{ "kind": 1001, "name": "Health" }],
                "archetypes": [{
                    "name": "deer",
                    "writer": "simulation",
                    "readers": ["AI", "client"],
                    "components": { "54": { "x": 1.0, "y": 2.0, "z": 3.0 } }
                }],
                "spawn": [{ "archetype": "deer", "count": 2 }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.worker_type, "myWorker");
        assert_eq!(config.tick_interval(), Duration::from_secs(3));
        assert_eq!(config.attributes, vec!["simulation".to_string()]);
        assert!(config.registry().contains(ComponentKind(1001)));
        assert_eq!(config.spawn[0].count, 2);
        assert!(config.archetype("deer").is_some());
    }

    #[test]
    fn test_archetype_components_round_trip() {
        let config = WorkerConfig::default().with_archetype(deer()).with_spawn("deer", 1);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""54":{"x":1.0,"y":2.0,"z":3.0}"#));

        let decoded = WorkerConfig::from_json_str(&json).unwrap();
        assert_eq!(decoded, config);
        let position = &decoded.archetype("deer").unwrap().components[&ComponentKind::POSITION];
        assert_eq!(Position::from_data(position).unwrap(), Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_unknown_spawn_archetype_rejected() {
        let config = WorkerConfig::default().with_spawn("wolf", 1);
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::UnknownArchetype("wolf".to_string()))
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = WorkerConfig::default().with_command_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigurationError::ZeroTimeout));
    }

    #[test]
    fn test_empty_readers_rejected() {
        let mut archetype = deer();
        archetype.readers.clear();
        let config = WorkerConfig::default().with_archetype(archetype);
        assert_eq!(config.validate(), Err(ConfigurationError::EmptyReaderRoles));
    }

    #[test]
    fn test_archetype_acl_covers_acl_and_interest() {
        let archetype = deer().with_interest(InterestRule {
            anchor: ComponentKind::POSITION,
            constraints: vec![QueryConstraint::Sphere {
                center: Vector3::new(1.0, 2.0, 3.0),
                radius: 2000.0,
            }],
            result_components: vec![ComponentKind::POSITION],
            frequency_hz: 30.0,
        });

        let acl = archetype.acl().unwrap();
        assert!(acl.covers(ComponentKind::POSITION));
        assert!(acl.covers(ComponentKind::ENTITY_ACL));
        assert!(acl.covers(ComponentKind::INTEREST));
        assert!(acl.can_write(ComponentKind::POSITION, &["simulation"]));
        assert!(!acl.can_write(ComponentKind::POSITION, &["client"]));
        assert!(acl.can_read(&["client"]));

        let template = archetype.creation_request().unwrap().assemble().unwrap();
        assert_eq!(template.len(), 3);
    }

    #[test]
    fn test_duration_setters_saturate() {
        let config = WorkerConfig::default()
            .with_tick_interval(Duration::MAX)
            .with_command_timeout(Duration::from_millis(250));

        assert_eq!(config.tick_interval_ms, u64::MAX);
        assert_eq!(config.command_timeout_ms, 250);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            WorkerConfig::from_json_str("{ not json"),
            Err(ConfigurationError::Invalid(_))
        ));
    }
}
