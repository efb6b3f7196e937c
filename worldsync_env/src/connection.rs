//! Transport abstraction between a worker and the coordinator.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::events::{EventBatch, LogLevel};
use crate::params::ConnectionParams;
use crate::types::{CommandRequest, ComponentKind, ComponentUpdate, EntityId, EntityTemplate, RequestId};
use std::time::Duration;

/// An established link to the coordinator.
///
/// # Implementations
///
/// - **Production**: wraps the vendor protocol client
/// - **Simulation**: `SimConnection`, an in-memory coordinator
///
/// # Request Flow
///
/// ```text
/// Worker                     Connection                 Coordinator
///   |                           |                          |
///   |-- send_*(..) -> id ------>|------------------------->|
///   |                           |<---- response(id) -------|
///   |<-- poll() -> [events] ----|                          |
/// ```
///
/// Every `send_*` call is non-blocking. Responses are never delivered
/// through callbacks; they arrive as events on a later `poll`.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Asks the coordinator to reserve `count` fresh entity ids.
    fn send_reserve_entity_ids(&self, count: u32, timeout: Duration) -> Result<RequestId, EnvError>;

    /// Asks the coordinator to create an entity under a reserved id.
    fn send_create_entity(
        &self,
        template: EntityTemplate,
        entity_id: EntityId,
        timeout: Duration,
    ) -> Result<RequestId, EnvError>;

    /// Publishes a partial update for a component this worker is authoritative over.
    ///
    /// Updates are not acknowledged.
    fn send_component_update(
        &self,
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    ) -> Result<(), EnvError>;

    /// Sends a command to whichever worker owns the target component.
    fn send_command_request(
        &self,
        entity_id: EntityId,
        command: CommandRequest,
        timeout: Duration,
    ) -> Result<RequestId, EnvError>;

    /// Forwards a log line to the coordinator.
    fn send_log_message(&self, level: LogLevel, logger: &str, message: &str);

    /// Retrieves the next batch of events, waiting at most `timeout`.
    ///
    /// # Returns
    /// * `Ok(batch)` - possibly empty
    /// * `Err(EnvError::ConnectionLost)` - the link is gone
    async fn poll(&self, timeout: Duration) -> Result<EventBatch, EnvError>;

    /// Returns true while the link is usable.
    fn is_connected(&self) -> bool;

    /// The id this worker connected as.
    fn worker_id(&self) -> &str;

    /// Attributes this worker declared on connect.
    fn attributes(&self) -> &[String];
}

/// Opens connections. The engine never constructs one itself.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// Connects to `params.host:params.port` as `params.worker_id`.
    async fn connect(&self, params: &ConnectionParams, attributes: Vec<String>) -> Result<Self::Conn, EnvError>;
}
