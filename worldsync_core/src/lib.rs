//! WorldSync Core - Entity Lifecycle & Authority Synchronization Engine
//!
//! This library keeps a simulation worker consistent with a remote,
//! authoritative world-state coordinator:
//! 1. **Authority**: entities are created with an ACL naming who may read
//!    them and who may write each component
//! 2. **Interest**: workers declare queries and receive only matching entities
//! 3. **Lifecycle**: ids are reserved before creation, every request is
//!    correlated with exactly one response or timeout
//! 4. **Synchronization**: a poll → ingest → publish → sleep loop folds the
//!    event stream into a local view and republishes owned state

pub mod acl;
pub mod component;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod factory;
pub mod interest;
pub mod pending;
pub mod reconciler;
pub mod registry;
pub mod template;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use acl::{compute_acl, Attribute, AttributeSet, EntityAcl, RequirementSet};
pub use component::{Component, Metadata, Position};
pub use config::{ArchetypeConfig, InterestRule, SpawnConfig, WorkerConfig};
pub use correlator::{CommandCorrelator, CommandResolution, CommandResult, RequestHandle};
pub use engine::{Intent, Intents, RunSummary, SyncBehavior, TickInput, TickReport, WorkerEngine};
pub use error::{CommandError, CommandErrorKind, ConfigurationError, RequestOperation, WorkerError};
pub use factory::{CreationHandle, CreationOutcome, CreationState, EntityFactory};
pub use interest::{build_interest, InterestComponent, InterestDescriptor, InterestQuery, QueryCandidate, QueryConstraint};
pub use reconciler::{Ingested, Reconciler, ViewChange};
pub use registry::{ComponentEntry, ComponentRegistry};
pub use template::{CreationRequest, EntityBuilder};
pub use view::{EntityState, LocalView};
