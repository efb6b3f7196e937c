//! Scenarios run against the in-memory coordinator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SYNC-001: Managed spawns deer and a hunter, the hunter worker shoots them
    Reference,

    /// SYNC-002: A worker tries to update components it does not own
    AuthorityRejection,

    /// SYNC-003: The coordinator never answers commands
    CommandTimeout,

    /// SYNC-004: The coordinator refuses every creation
    CreationFailure,

    /// SYNC-005: The owning worker leaves; a second one takes over
    Handover,

    /// SYNC-006: The coordinator sends a fatal log message
    FatalLog,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Reference,
            ScenarioId::AuthorityRejection,
            ScenarioId::CommandTimeout,
            ScenarioId::CreationFailure,
            ScenarioId::Handover,
            ScenarioId::FatalLog,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Reference => "reference",
            ScenarioId::AuthorityRejection => "authority_rejection",
            ScenarioId::CommandTimeout => "command_timeout",
            ScenarioId::CreationFailure => "creation_failure",
            ScenarioId::Handover => "handover",
            ScenarioId::FatalLog => "fatal_log",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Reference => "Deer spawner plus hunter: creation, interest, updates and got_shot commands",
            ScenarioId::AuthorityRejection => "Updates without write authority are rejected locally and never sent",
            ScenarioId::CommandTimeout => "Dropped command responses resolve as timeouts",
            ScenarioId::CreationFailure => "Rejected creations are reported once per entity",
            ScenarioId::Handover => "Authority moves to the remaining worker after a disconnect",
            ScenarioId::FatalLog => "A fatal remote log ends the worker loop with an error",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference" | "sync-001" => Ok(ScenarioId::Reference),
            "authority_rejection" | "authority" | "sync-002" => Ok(ScenarioId::AuthorityRejection),
            "command_timeout" | "timeout" | "sync-003" => Ok(ScenarioId::CommandTimeout),
            "creation_failure" | "sync-004" => Ok(ScenarioId::CreationFailure),
            "handover" | "sync-005" => Ok(ScenarioId::Handover),
            "fatal_log" | "fatal" | "sync-006" => Ok(ScenarioId::FatalLog),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
