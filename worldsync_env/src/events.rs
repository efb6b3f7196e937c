//! Events delivered by the coordinator on the polled stream.

use crate::types::{ComponentData, ComponentKind, ComponentUpdate, EntityId, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status attached to every response event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    Timeout,
    NotFound,
    AuthorityLost,
    PermissionDenied,
    ApplicationError,
    InternalError,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Success => "success",
            StatusCode::Timeout => "timeout",
            StatusCode::NotFound => "not_found",
            StatusCode::AuthorityLost => "authority_lost",
            StatusCode::PermissionDenied => "permission_denied",
            StatusCode::ApplicationError => "application_error",
            StatusCode::InternalError => "internal_error",
        };
        write!(f, "{}", name)
    }
}

/// Severity of log messages exchanged with the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Write-authority state of this worker over one component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Authority {
    #[default]
    NotAuthoritative,
    Authoritative,
    /// Still authoritative, but the coordinator is about to move authority.
    AuthorityLossImminent,
}

impl Authority {
    /// True while updates may still be sent.
    pub fn can_write(&self) -> bool {
        matches!(self, Authority::Authoritative | Authority::AuthorityLossImminent)
    }
}

/// One event from the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    AddEntity {
        entity_id: EntityId,
    },
    RemoveEntity {
        entity_id: EntityId,
    },
    AddComponent {
        entity_id: EntityId,
        component: ComponentKind,
        data: ComponentData,
    },
    RemoveComponent {
        entity_id: EntityId,
        component: ComponentKind,
    },
    ComponentUpdate {
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    },
    AuthorityChange {
        entity_id: EntityId,
        component: ComponentKind,
        authority: Authority,
    },
    ReserveEntityIdsResponse {
        request_id: RequestId,
        status: StatusCode,
        message: String,
        first_entity_id: Option<EntityId>,
        number_of_entity_ids: u32,
    },
    CreateEntityResponse {
        request_id: RequestId,
        status: StatusCode,
        message: String,
        entity_id: Option<EntityId>,
    },
    CommandResponse {
        request_id: RequestId,
        entity_id: EntityId,
        status: StatusCode,
        message: String,
        response: Option<Value>,
    },
    LogMessage {
        level: LogLevel,
        message: String,
    },
    Disconnect {
        reason: String,
    },
}

impl WorkerEvent {
    /// The entity an event refers to, if any.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            WorkerEvent::AddEntity { entity_id }
            | WorkerEvent::RemoveEntity { entity_id }
            | WorkerEvent::AddComponent { entity_id, .. }
            | WorkerEvent::RemoveComponent { entity_id, .. }
            | WorkerEvent::ComponentUpdate { entity_id, .. }
            | WorkerEvent::AuthorityChange { entity_id, .. }
            | WorkerEvent::CommandResponse { entity_id, .. } => Some(*entity_id),
            WorkerEvent::CreateEntityResponse { entity_id, .. } => *entity_id,
            WorkerEvent::ReserveEntityIdsResponse { first_entity_id, .. } => *first_entity_id,
            WorkerEvent::LogMessage { .. } | WorkerEvent::Disconnect { .. } => None,
        }
    }

    /// True for events that mutate the local view.
    pub fn is_state_event(&self) -> bool {
        matches!(
            self,
            WorkerEvent::AddEntity { .. }
                | WorkerEvent::RemoveEntity { .. }
                | WorkerEvent::AddComponent { .. }
                | WorkerEvent::RemoveComponent { .. }
                | WorkerEvent::ComponentUpdate { .. }
                | WorkerEvent::AuthorityChange { .. }
        )
    }
}

/// An ordered batch of events returned by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    events: Vec<WorkerEvent>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: WorkerEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorkerEvent> {
        self.events.iter()
    }
}

impl From<Vec<WorkerEvent>> for EventBatch {
    fn from(events: Vec<WorkerEvent>) -> Self {
        Self { events }
    }
}

impl IntoIterator for EventBatch {
    type Item = WorkerEvent;
    type IntoIter = std::vec::IntoIter<WorkerEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl FromIterator<WorkerEvent> for EventBatch {
    fn from_iter<I: IntoIterator<Item = WorkerEvent>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}
