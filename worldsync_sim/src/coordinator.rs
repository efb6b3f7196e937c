//! In-memory coordinator with fault injection.
//!
//! [`SimCoordinator`] plays the authoritative world-state service. Each
//! connected worker gets a [`SimConnection`] whose `send_*` calls are
//! applied immediately and whose responses and entity stream are queued
//! for that worker's next `poll`.
//!
//! # Rules
//!
//! - Entity ids must be reserved before an entity can be created under them,
//!   and the template must carry an `EntityAcl`.
//! - Authority over each component goes to the first connected worker whose
//!   attributes satisfy the component's write requirement.
//! - A worker sees an entity if it may read it and either holds authority
//!   over one of its components or holds authority over an interest anchor
//!   whose query matches it.
//! - Updates are only applied when sent by the authoritative worker; others
//!   get an error log back. Applied updates are echoed to every observer.
//! - Commands run against registered [`CommandHandler`]s.

use async_trait::async_trait;
use nalgebra::Vector3;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use worldsync_core::{Component, EntityAcl, InterestComponent, Position, QueryCandidate};
use worldsync_env::{
    Authority, CommandKind, CommandRequest, ComponentKind, ComponentUpdate, Connection, ConnectionParams, Connector,
    EntityId, EntityTemplate, EnvError, EventBatch, LogLevel, RequestId, StatusCode, WorkerEvent,
};

/// Result of a successfully handled command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub response: Value,

    /// Updates applied to the target entity on behalf of its owner
    pub updates: Vec<(ComponentKind, ComponentUpdate)>,
}

/// Executes a command against the target entity's components.
pub type CommandHandler =
    Box<dyn Fn(&EntityTemplate, &Value) -> Result<CommandOutput, (StatusCode, String)> + Send + Sync>;

/// Faults injected into the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Every reservation fails
    pub reject_reservations: bool,

    /// Every creation fails
    pub reject_creations: bool,

    /// Commands are accepted but never answered
    pub drop_command_responses: bool,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_rejected_reservations(mut self) -> Self {
        self.reject_reservations = true;
        self
    }

    pub fn with_rejected_creations(mut self) -> Self {
        self.reject_creations = true;
        self
    }

    pub fn with_dropped_command_responses(mut self) -> Self {
        self.drop_command_responses = true;
        self
    }
}

/// Counters for scenario metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub ids_reserved: u64,
    pub entities_created: u64,
    pub requests_rejected: u64,
    pub updates_applied: u64,
    pub updates_rejected: u64,
    pub commands_handled: u64,
    pub commands_dropped: u64,
}

struct WorkerSlot {
    worker_id: String,
    attributes: Vec<String>,
    connected: bool,
    next_request_id: u64,
    outbox: VecDeque<WorkerEvent>,

    /// Entity → components currently streamed to this worker
    visible: BTreeMap<EntityId, BTreeSet<ComponentKind>>,

    /// Component instances this worker has been told it is authoritative over
    authority: BTreeSet<(EntityId, ComponentKind)>,
}

impl WorkerSlot {
    fn next_request(&mut self) -> RequestId {
        self.next_request_id += 1;
        RequestId(self.next_request_id)
    }

    fn sees(&self, entity_id: EntityId, component: ComponentKind) -> bool {
        self.visible
            .get(&entity_id)
            .map(|kinds| kinds.contains(&component))
            .unwrap_or(false)
    }
}

struct SimEntity {
    components: EntityTemplate,
    acl: EntityAcl,

    /// Component → index of the authoritative worker
    authority: BTreeMap<ComponentKind, usize>,
}

impl SimEntity {
    fn position(&self) -> Option<Vector3<f64>> {
        self.components
            .get(&ComponentKind::POSITION)
            .and_then(|data| Position::from_data(data).ok())
            .map(|p| p.coords())
    }

    fn is_owned_by(&self, slot: usize) -> bool {
        self.authority.values().any(|owner| *owner == slot)
    }
}

#[derive(Default)]
struct State {
    workers: Vec<WorkerSlot>,
    entities: BTreeMap<EntityId, SimEntity>,
    reserved: BTreeSet<EntityId>,
    next_entity_id: i64,
    faults: FaultPlan,
    handlers: BTreeMap<CommandKind, CommandHandler>,
    logs: Vec<(String, LogLevel, String)>,
    stats: CoordinatorStats,
}

/// The in-memory coordinator shared by every simulated worker.
pub struct SimCoordinator {
    state: Mutex<State>,
}

impl SimCoordinator {
    pub fn new(faults: FaultPlan) -> Self {
        Self {
            state: Mutex::new(State {
                next_entity_id: 1,
                faults,
                ..State::default()
            }),
        }
    }

    pub fn shared(faults: FaultPlan) -> Arc<Self> {
        Arc::new(Self::new(faults))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers the handler for one command.
    pub fn register_handler(&self, command: CommandKind, handler: CommandHandler) {
        self.lock().handlers.insert(command, handler);
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        self.lock().faults = faults;
    }

    /// Connects a worker and assigns it any authority it qualifies for.
    pub fn connect(self: &Arc<Self>, worker_id: &str, attributes: Vec<String>) -> Result<SimConnection, EnvError> {
        let mut state = self.lock();
        if state.workers.iter().any(|w| w.connected && w.worker_id == worker_id) {
            return Err(EnvError::connection_lost(format!("worker id {} already connected", worker_id)));
        }

        state.workers.push(WorkerSlot {
            worker_id: worker_id.to_string(),
            attributes: attributes.clone(),
            connected: true,
            next_request_id: 0,
            outbox: VecDeque::new(),
            visible: BTreeMap::new(),
            authority: BTreeSet::new(),
        });
        let slot = state.workers.len() - 1;
        info!("Worker {} connected with attributes {:?}", worker_id, attributes);

        state.reassign_all();
        state.refresh();

        Ok(SimConnection {
            coordinator: Arc::clone(self),
            slot,
            worker_id: worker_id.to_string(),
            attributes,
        })
    }

    /// Ends a worker's session. Its authority moves to other qualifying workers.
    pub fn disconnect(&self, worker_id: &str, reason: &str) {
        let mut state = self.lock();
        if let Some(worker) = state.workers.iter_mut().find(|w| w.connected && w.worker_id == worker_id) {
            worker.outbox.push_back(WorkerEvent::Disconnect {
                reason: reason.to_string(),
            });
            worker.connected = false;
            info!("Worker {} disconnected: {}", worker_id, reason);
        }
        state.reassign_all();
        state.refresh();
    }

    /// Disconnects every worker.
    pub fn shutdown(&self, reason: &str) {
        for worker_id in self.worker_ids() {
            self.disconnect(&worker_id, reason);
        }
    }

    /// Sends a log message to one worker.
    pub fn send_log(&self, worker_id: &str, level: LogLevel, message: &str) {
        let mut state = self.lock();
        if let Some(worker) = state.workers.iter_mut().find(|w| w.connected && w.worker_id == worker_id) {
            worker.outbox.push_back(WorkerEvent::LogMessage {
                level,
                message: message.to_string(),
            });
        }
    }

    /// Ids of connected workers, in connection order.
    pub fn worker_ids(&self) -> Vec<String> {
        self.lock()
            .workers
            .iter()
            .filter(|w| w.connected)
            .map(|w| w.worker_id.clone())
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.lock().entities.keys().copied().collect()
    }

    /// Authoritative state of an entity.
    pub fn entity(&self, entity_id: EntityId) -> Option<EntityTemplate> {
        self.lock().entities.get(&entity_id).map(|e| e.components.clone())
    }

    /// Worker currently authoritative over a component instance.
    pub fn authority_of(&self, entity_id: EntityId, component: ComponentKind) -> Option<String> {
        let state = self.lock();
        let slot = *state.entities.get(&entity_id)?.authority.get(&component)?;
        Some(state.workers[slot].worker_id.clone())
    }

    /// Entities streamed to a worker.
    pub fn visible_to(&self, worker_id: &str) -> Vec<EntityId> {
        self.lock()
            .workers
            .iter()
            .find(|w| w.worker_id == worker_id)
            .map(|w| w.visible.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Log messages received from workers: (worker id, level, message).
    pub fn logs(&self) -> Vec<(String, LogLevel, String)> {
        self.lock().logs.clone()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.lock().stats
    }

    fn reserve(&self, slot: usize, count: u32) -> Result<RequestId, EnvError> {
        let mut state = self.lock();
        let request_id = state.request_id(slot)?;

        let event = if state.faults.reject_reservations || count == 0 {
            state.stats.requests_rejected += 1;
            WorkerEvent::ReserveEntityIdsResponse {
                request_id,
                status: StatusCode::ApplicationError,
                message: "reservation rejected".to_string(),
                first_entity_id: None,
                number_of_entity_ids: 0,
            }
        } else {
            let first = state.next_entity_id;
            state.next_entity_id += i64::from(count);
            for id in first..first + i64::from(count) {
                state.reserved.insert(EntityId(id));
            }
            state.stats.ids_reserved += u64::from(count);
            WorkerEvent::ReserveEntityIdsResponse {
                request_id,
                status: StatusCode::Success,
                message: String::new(),
                first_entity_id: Some(EntityId(first)),
                number_of_entity_ids: count,
            }
        };

        state.workers[slot].outbox.push_back(event);
        Ok(request_id)
    }

    fn create(&self, slot: usize, template: EntityTemplate, entity_id: EntityId) -> Result<RequestId, EnvError> {
        let mut state = self.lock();
        let request_id = state.request_id(slot)?;

        match state.validate_creation(&template, entity_id) {
            Ok(acl) => {
                state.reserved.remove(&entity_id);
                state.entities.insert(
                    entity_id,
                    SimEntity {
                        components: template,
                        acl,
                        authority: BTreeMap::new(),
                    },
                );
                state.stats.entities_created += 1;
                state.workers[slot].outbox.push_back(WorkerEvent::CreateEntityResponse {
                    request_id,
                    status: StatusCode::Success,
                    message: String::new(),
                    entity_id: Some(entity_id),
                });
                debug!("Created entity {}", entity_id);
                state.reassign_all();
                state.refresh();
            }
            Err(message) => {
                state.stats.requests_rejected += 1;
                warn!("Rejected creation of entity {}: {}", entity_id, message);
                state.workers[slot].outbox.push_back(WorkerEvent::CreateEntityResponse {
                    request_id,
                    status: StatusCode::ApplicationError,
                    message,
                    entity_id: None,
                });
            }
        }
        Ok(request_id)
    }

    fn update(
        &self,
        slot: usize,
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    ) -> Result<(), EnvError> {
        let mut state = self.lock();
        state.ensure_connected(slot)?;

        let owner = state
            .entities
            .get(&entity_id)
            .and_then(|e| e.authority.get(&component).copied());
        if owner != Some(slot) {
            state.stats.updates_rejected += 1;
            let worker = &mut state.workers[slot];
            let message = format!(
                "Worker {} is not authoritative over {} on entity {}; update dropped",
                worker.worker_id, component, entity_id
            );
            warn!("{}", message);
            worker.outbox.push_back(WorkerEvent::LogMessage {
                level: LogLevel::Error,
                message,
            });
            return Ok(());
        }

        state.apply_update(entity_id, component, update);
        Ok(())
    }

    fn command(
        &self,
        slot: usize,
        entity_id: EntityId,
        command: CommandRequest,
    ) -> Result<RequestId, EnvError> {
        let mut state = self.lock();
        let request_id = state.request_id(slot)?;

        if state.faults.drop_command_responses {
            state.stats.commands_dropped += 1;
            debug!("Dropping response to {} ({})", command.kind, request_id);
            return Ok(request_id);
        }

        let result = state.handle_command(entity_id, &command);
        let (status, message, response) = match result {
            Ok(output) => {
                state.stats.commands_handled += 1;
                for (component, update) in output.updates {
                    state.apply_update(entity_id, component, update);
                }
                (StatusCode::Success, String::new(), Some(output.response))
            }
            Err((status, message)) => (status, message, None),
        };

        state.workers[slot].outbox.push_back(WorkerEvent::CommandResponse {
            request_id,
            entity_id,
            status,
            message,
            response,
        });
        Ok(request_id)
    }

    fn log(&self, slot: usize, level: LogLevel, logger: &str, message: &str) {
        let mut state = self.lock();
        let worker_id = state.workers[slot].worker_id.clone();
        debug!("[{}:{}] {:?} {}", worker_id, logger, level, message);
        state.logs.push((worker_id, level, message.to_string()));
    }

    fn poll(&self, slot: usize) -> Result<EventBatch, EnvError> {
        let mut state = self.lock();
        let worker = &mut state.workers[slot];
        if !worker.connected && worker.outbox.is_empty() {
            return Err(EnvError::connection_lost(format!("{} is disconnected", worker.worker_id)));
        }
        Ok(worker.outbox.drain(..).collect())
    }

    /// Still connected, or holding undelivered events.
    fn is_connected(&self, slot: usize) -> bool {
        let state = self.lock();
        let worker = &state.workers[slot];
        worker.connected || !worker.outbox.is_empty()
    }
}

impl State {
    fn ensure_connected(&self, slot: usize) -> Result<(), EnvError> {
        if self.workers[slot].connected {
            Ok(())
        } else {
            Err(EnvError::connection_lost(format!(
                "{} is disconnected",
                self.workers[slot].worker_id
            )))
        }
    }

    fn request_id(&mut self, slot: usize) -> Result<RequestId, EnvError> {
        self.ensure_connected(slot)?;
        Ok(self.workers[slot].next_request())
    }

    fn validate_creation(&self, template: &EntityTemplate, entity_id: EntityId) -> Result<EntityAcl, String> {
        if self.faults.reject_creations {
            return Err("creation rejected".to_string());
        }
        if self.entities.contains_key(&entity_id) {
            return Err(format!("entity {} already exists", entity_id));
        }
        if !self.reserved.contains(&entity_id) {
            return Err(format!("entity id {} was not reserved", entity_id));
        }
        let data = template
            .get(&ComponentKind::ENTITY_ACL)
            .ok_or_else(|| "template has no EntityAcl".to_string())?;
        EntityAcl::from_data(data).map_err(|e| format!("malformed EntityAcl: {}", e))
    }

    fn handle_command(&self, entity_id: EntityId, command: &CommandRequest) -> Result<CommandOutput, (StatusCode, String)> {
        let entity = self
            .entities
            .get(&entity_id)
            .ok_or_else(|| (StatusCode::NotFound, format!("entity {} not found", entity_id)))?;
        if !entity.components.contains_key(&command.kind.component) {
            return Err((
                StatusCode::NotFound,
                format!("entity {} has no {}", entity_id, command.kind.component),
            ));
        }
        if !entity.authority.contains_key(&command.kind.component) {
            return Err((
                StatusCode::AuthorityLost,
                format!("no worker is authoritative over {} on entity {}", command.kind.component, entity_id),
            ));
        }
        let handler = self
            .handlers
            .get(&command.kind)
            .ok_or_else(|| (StatusCode::ApplicationError, format!("no handler for {}", command.kind)))?;
        handler(&entity.components, &command.payload)
    }

    /// Applies an update, echoes it to observers and refreshes visibility.
    fn apply_update(&mut self, entity_id: EntityId, component: ComponentKind, update: ComponentUpdate) {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return;
        };
        let Some(data) = entity.components.get_mut(&component) else {
            return;
        };
        data.apply(&update);
        if component == ComponentKind::ENTITY_ACL {
            if let Ok(acl) = EntityAcl::from_data(data) {
                entity.acl = acl;
            }
        }
        self.stats.updates_applied += 1;

        for worker in self.workers.iter_mut().filter(|w| w.connected) {
            if worker.sees(entity_id, component) {
                worker.outbox.push_back(WorkerEvent::ComponentUpdate {
                    entity_id,
                    component,
                    update: update.clone(),
                });
            }
        }

        if [ComponentKind::POSITION, ComponentKind::INTEREST, ComponentKind::ENTITY_ACL].contains(&component) {
            self.reassign_all();
            self.refresh();
        }
    }

    fn reassign_all(&mut self) {
        let workers = &self.workers;
        for entity in self.entities.values_mut() {
            let mut authority = BTreeMap::new();
            for (kind, requirement) in &entity.acl.component_write {
                let keep = entity
                    .authority
                    .get(kind)
                    .copied()
                    .filter(|slot| workers[*slot].connected && requirement.is_satisfied_by(&workers[*slot].attributes));
                let owner = keep.or_else(|| {
                    workers
                        .iter()
                        .position(|w| w.connected && requirement.is_satisfied_by(&w.attributes))
                });
                if let Some(slot) = owner {
                    authority.insert(*kind, slot);
                }
            }
            entity.authority = authority;
        }
    }

    /// Brings every connected worker's stream in line with what it should see.
    fn refresh(&mut self) {
        let entities = &self.entities;
        for (slot, worker) in self.workers.iter_mut().enumerate() {
            if !worker.connected {
                continue;
            }
            let desired = desired_view(entities, worker, slot);
            let current = std::mem::take(&mut worker.visible);

            for (entity_id, kinds) in &desired {
                let entity = &entities[entity_id];
                let known = current.get(entity_id);
                if known.is_none() {
                    worker.outbox.push_back(WorkerEvent::AddEntity { entity_id: *entity_id });
                }
                for kind in kinds {
                    if known.map(|k| !k.contains(kind)).unwrap_or(true) {
                        worker.outbox.push_back(WorkerEvent::AddComponent {
                            entity_id: *entity_id,
                            component: *kind,
                            data: entity.components[kind].clone(),
                        });
                    }
                }
                for kind in known.into_iter().flatten() {
                    if !kinds.contains(kind) {
                        worker.outbox.push_back(WorkerEvent::RemoveComponent {
                            entity_id: *entity_id,
                            component: *kind,
                        });
                    }
                }
            }
            for entity_id in current.keys() {
                if !desired.contains_key(entity_id) {
                    worker.outbox.push_back(WorkerEvent::RemoveEntity { entity_id: *entity_id });
                }
            }

            let authority: BTreeSet<(EntityId, ComponentKind)> = desired
                .iter()
                .flat_map(|(entity_id, kinds)| {
                    let entity = &entities[entity_id];
                    kinds
                        .iter()
                        .filter(move |kind| entity.authority.get(*kind) == Some(&slot))
                        .map(move |kind| (*entity_id, *kind))
                })
                .collect();
            for (entity_id, kind) in authority.difference(&worker.authority) {
                worker.outbox.push_back(WorkerEvent::AuthorityChange {
                    entity_id: *entity_id,
                    component: *kind,
                    authority: Authority::Authoritative,
                });
            }
            for (entity_id, kind) in worker.authority.difference(&authority) {
                if desired.get(entity_id).map(|k| k.contains(kind)).unwrap_or(false) {
                    worker.outbox.push_back(WorkerEvent::AuthorityChange {
                        entity_id: *entity_id,
                        component: *kind,
                        authority: Authority::NotAuthoritative,
                    });
                }
            }

            worker.visible = desired;
            worker.authority = authority;
        }
    }
}

/// Entity → components a worker should currently see.
fn desired_view(
    entities: &BTreeMap<EntityId, SimEntity>,
    worker: &WorkerSlot,
    slot: usize,
) -> BTreeMap<EntityId, BTreeSet<ComponentKind>> {
    let mut desired: BTreeMap<EntityId, BTreeSet<ComponentKind>> = BTreeMap::new();

    for (entity_id, entity) in entities {
        if entity.is_owned_by(slot) && entity.acl.can_read(&worker.attributes) {
            desired.insert(*entity_id, entity.components.keys().copied().collect());
        }
    }

    for anchor_entity in entities.values() {
        let Some(interest) = anchor_entity
            .components
            .get(&ComponentKind::INTEREST)
            .and_then(|data| InterestComponent::from_data(data).ok())
        else {
            continue;
        };
        let anchor_position = anchor_entity.position();

        for descriptor in interest.descriptors() {
            if anchor_entity.authority.get(&descriptor.anchor) != Some(&slot) {
                continue;
            }
            for (entity_id, entity) in entities {
                if !entity.acl.can_read(&worker.attributes) {
                    continue;
                }
                let kinds: Vec<ComponentKind> = entity.components.keys().copied().collect();
                let candidate = QueryCandidate {
                    entity_id: *entity_id,
                    position: entity.position(),
                    components: &kinds,
                };
                for query in &descriptor.queries {
                    if query.constraint.matches(&candidate, anchor_position.as_ref()) {
                        desired
                            .entry(*entity_id)
                            .or_default()
                            .extend(kinds.iter().copied().filter(|kind| query.wants(*kind)));
                    }
                }
            }
        }
    }

    desired
}

/// A worker's link to a [`SimCoordinator`].
pub struct SimConnection {
    coordinator: Arc<SimCoordinator>,
    slot: usize,
    worker_id: String,
    attributes: Vec<String>,
}

impl SimConnection {
    pub fn coordinator(&self) -> &Arc<SimCoordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl Connection for SimConnection {
    fn send_reserve_entity_ids(&self, count: u32, _timeout: Duration) -> Result<RequestId, EnvError> {
        self.coordinator.reserve(self.slot, count)
    }

    fn send_create_entity(
        &self,
        template: EntityTemplate,
        entity_id: EntityId,
        _timeout: Duration,
    ) -> Result<RequestId, EnvError> {
        self.coordinator.create(self.slot, template, entity_id)
    }

    fn send_component_update(
        &self,
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    ) -> Result<(), EnvError> {
        self.coordinator.update(self.slot, entity_id, component, update)
    }

    fn send_command_request(
        &self,
        entity_id: EntityId,
        command: CommandRequest,
        _timeout: Duration,
    ) -> Result<RequestId, EnvError> {
        self.coordinator.command(self.slot, entity_id, command)
    }

    fn send_log_message(&self, level: LogLevel, logger: &str, message: &str) {
        self.coordinator.log(self.slot, level, logger, message);
    }

    async fn poll(&self, _timeout: Duration) -> Result<EventBatch, EnvError> {
        self.coordinator.poll(self.slot)
    }

    fn is_connected(&self) -> bool {
        self.coordinator.is_connected(self.slot)
    }

    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

/// Opens [`SimConnection`]s; host and port are ignored.
pub struct SimConnector {
    coordinator: Arc<SimCoordinator>,
}

impl SimConnector {
    pub fn new(coordinator: Arc<SimCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Connector for SimConnector {
    type Conn = SimConnection;

    async fn connect(&self, params: &ConnectionParams, attributes: Vec<String>) -> Result<SimConnection, EnvError> {
        self.coordinator.connect(&params.worker_id, attributes)
    }
}
