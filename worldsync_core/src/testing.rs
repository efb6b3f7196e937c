//! Test doubles: a scripted connection and a manually advanced clock.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use worldsync_env::{
    CommandRequest, ComponentKind, ComponentUpdate, Connection, EntityId, EntityTemplate, EnvError, EventBatch,
    LogLevel, RequestId, WorkerContext, WorkerEvent,
};

/// A request recorded by [`MockConnection`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Reserve {
        id: RequestId,
        count: u32,
        timeout: Duration,
    },
    Create {
        id: RequestId,
        entity_id: EntityId,
        template: EntityTemplate,
    },
    Update {
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    },
    Command {
        id: RequestId,
        entity_id: EntityId,
        command: CommandRequest,
        timeout: Duration,
    },
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    sent: Vec<Sent>,
    logs: Vec<(LogLevel, String)>,
    batches: VecDeque<EventBatch>,
    disconnected: bool,
}

/// Records every send and replays scripted event batches on `poll`.
///
/// Request ids start at 1 and are shared across all request kinds.
pub(crate) struct MockConnection {
    state: Mutex<MockState>,
    worker_id: String,
    attributes: Vec<String>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            worker_id: "Managed_test".to_string(),
            attributes: vec!["simulation".to_string()],
        }
    }

    /// Queues a batch for a later `poll`.
    pub fn push_events(&self, events: Vec<WorkerEvent>) {
        self.state.lock().unwrap().batches.push_back(EventBatch::from(events));
    }

    /// Makes the next request id `next + 1`, simulating a connection that reuses ids.
    pub fn rewind_request_ids(&self, next: u64) {
        self.state.lock().unwrap().next_id = next;
    }

    pub fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn creates(&self) -> Vec<(EntityTemplate, EntityId)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Create { entity_id, template, .. } => Some((template, entity_id)),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(EntityId, ComponentKind, ComponentUpdate)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Update {
                    entity_id,
                    component,
                    update,
                } => Some((entity_id, component, update)),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<(RequestId, EntityId, CommandRequest)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Command {
                    id, entity_id, command, ..
                } => Some((id, entity_id, command)),
                _ => None,
            })
            .collect()
    }

    /// Number of log messages forwarded at `level`.
    pub fn logged(&self, level: LogLevel) -> usize {
        self.state.lock().unwrap().logs.iter().filter(|(l, _)| *l == level).count()
    }

    fn record(&self, build: impl FnOnce(RequestId) -> Sent) -> Result<RequestId, EnvError> {
        let mut state = self.state.lock().unwrap();
        if state.disconnected {
            return Err(EnvError::connection_lost("mock disconnected"));
        }
        state.next_id += 1;
        let id = RequestId(state.next_id);
        state.sent.push(build(id));
        Ok(id)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn send_reserve_entity_ids(&self, count: u32, timeout: Duration) -> Result<RequestId, EnvError> {
        self.record(|id| Sent::Reserve { id, count, timeout })
    }

    fn send_create_entity(
        &self,
        template: EntityTemplate,
        entity_id: EntityId,
        _timeout: Duration,
    ) -> Result<RequestId, EnvError> {
        self.record(|id| Sent::Create {
            id,
            entity_id,
            template,
        })
    }

    fn send_component_update(
        &self,
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    ) -> Result<(), EnvError> {
        let mut state = self.state.lock().unwrap();
        if state.disconnected {
            return Err(EnvError::connection_lost("mock disconnected"));
        }
        state.sent.push(Sent::Update {
            entity_id,
            component,
            update,
        });
        Ok(())
    }

    fn send_command_request(
        &self,
        entity_id: EntityId,
        command: CommandRequest,
        timeout: Duration,
    ) -> Result<RequestId, EnvError> {
        self.record(|id| Sent::Command {
            id,
            entity_id,
            command,
            timeout,
        })
    }

    fn send_log_message(&self, level: LogLevel, _logger: &str, message: &str) {
        self.state.lock().unwrap().logs.push((level, message.to_string()));
    }

    async fn poll(&self, _timeout: Duration) -> Result<EventBatch, EnvError> {
        let mut state = self.state.lock().unwrap();
        if state.disconnected {
            return Err(EnvError::connection_lost("mock disconnected"));
        }
        Ok(state.batches.pop_front().unwrap_or_default())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().unwrap().disconnected
    }

    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

/// Virtual clock that only moves on `sleep`.
#[derive(Default)]
pub(crate) struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerContext for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }

    fn seed(&self) -> u64 {
        0
    }
}
