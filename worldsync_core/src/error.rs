//! Error taxonomy of the synchronization engine.
//!
//! | Error | Origin | Leaves the process? |
//! |---|---|---|
//! | `Configuration` | invalid policy/interest/config input | never, rejected before any request |
//! | `Transport` | connection lost, send failed | propagates to the loop driver |
//! | `Authority` | mutation without write authority | never, rejected locally |
//! | `RequestFailed` | remote rejected a reservation/creation | returned to the caller |
//! | `Command` | per-command timeout or rejection | reported to the issuer only |

use thiserror::Error;
use worldsync_env::{CommandKind, ComponentKind, EntityId, EnvError, RequestId, StatusCode};

/// Invalid local input. Never sent over the wire.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("reader roles must not be empty")]
    EmptyReaderRoles,

    #[error("an ACL must cover at least one component")]
    EmptyComponentSet,

    #[error("interest requires at least one constraint")]
    EmptyConstraints,

    #[error("interest frequency must be positive, got {0}")]
    NonPositiveFrequency(f32),

    #[error("invalid interest constraint: {0}")]
    InvalidConstraint(String),

    #[error("{0} has no write requirement set in the entity ACL")]
    MissingWriteRequirement(ComponentKind),

    #[error("entity template is missing {0}")]
    MissingComponent(ComponentKind),

    #[error("timeout must be non-zero")]
    ZeroTimeout,

    #[error("unknown archetype: {0}")]
    UnknownArchetype(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which remote operation a `RequestFailed` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOperation {
    ReserveEntityIds,
    CreateEntity,
}

impl std::fmt::Display for RequestOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestOperation::ReserveEntityIds => write!(f, "reserve entity ids"),
            RequestOperation::CreateEntity => write!(f, "create entity"),
        }
    }
}

/// Why a command did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandErrorKind {
    /// No response within the deadline. The remote side may still act on it.
    Timeout,

    /// The coordinator or the owning worker answered with a failure.
    RemoteRejected { status: StatusCode, message: String },
}

/// Per-command failure, reported to the issuer only.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("command {command} on entity {entity_id} ({request_id}) failed: {kind:?}")]
pub struct CommandError {
    pub request_id: RequestId,
    pub entity_id: EntityId,
    pub command: CommandKind,
    pub kind: CommandErrorKind,
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, CommandErrorKind::Timeout)
    }
}

/// Top-level error of the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("no write authority over {component} on entity {entity_id}")]
    Authority {
        entity_id: EntityId,
        component: ComponentKind,
    },

    #[error("{operation} failed ({status}): {message}")]
    RequestFailed {
        operation: RequestOperation,
        status: StatusCode,
        message: String,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl WorkerError {
    /// True for errors the loop driver must act on (terminate or retry).
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(self, WorkerError::Transport(_))
    }
}
