//! Entity Factory - the reserve → build → create pipeline.
//!
//! Every creation attempt runs its own small state machine:
//!
//! ```text
//!   Idle ──reserve ok──► IdReserved(id) ──create ok──► Created(id)
//!     │                        │
//!     └──fail/timeout──► Failed ◄──fail/timeout──┘
//! ```
//!
//! The creation request is only ever sent after the reservation for the
//! same attempt has succeeded. Attempts are independent and may interleave.
//! Failures are reported as [`CreationOutcome`]s; nothing here terminates
//! the process.

use crate::error::{RequestOperation, WorkerError};
use crate::pending::PendingRequests;
use crate::template::CreationRequest;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use worldsync_env::{Connection, EntityId, EntityTemplate, LogLevel, RequestId, StatusCode};

const LOGGER: &str = "entity_factory";

/// Identifies one creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CreationHandle(pub u64);

impl std::fmt::Display for CreationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "creation-{}", self.0)
    }
}

/// State of one creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    /// Reservation in flight
    Idle,
    /// Id reserved, creation in flight
    IdReserved(EntityId),
    Created(EntityId),
    Failed,
}

impl CreationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreationState::Created(_) | CreationState::Failed)
    }
}

/// Terminal result of a creation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationOutcome {
    pub handle: CreationHandle,
    pub result: Result<EntityId, WorkerError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FactoryOp {
    Reserve(CreationHandle),
    Create(CreationHandle, EntityId),
}

impl FactoryOp {
    fn handle(&self) -> CreationHandle {
        match self {
            FactoryOp::Reserve(handle) | FactoryOp::Create(handle, _) => *handle,
        }
    }

    fn operation(&self) -> RequestOperation {
        match self {
            FactoryOp::Reserve(_) => RequestOperation::ReserveEntityIds,
            FactoryOp::Create(_, _) => RequestOperation::CreateEntity,
        }
    }
}

#[derive(Debug)]
struct Attempt {
    template: EntityTemplate,
    state: CreationState,
}

/// Drives creation attempts.
pub struct EntityFactory {
    /// Timeout of each reservation request
    reservation_timeout: Duration,

    /// Timeout of each creation request
    creation_timeout: Duration,

    attempts: BTreeMap<CreationHandle, Attempt>,
    pending: PendingRequests<FactoryOp>,
    outcomes: Vec<CreationOutcome>,
    next_handle: u64,
}

impl EntityFactory {
    pub fn new(reservation_timeout: Duration, creation_timeout: Duration) -> Self {
        Self {
            reservation_timeout,
            creation_timeout,
            attempts: BTreeMap::new(),
            pending: PendingRequests::new(),
            outcomes: Vec::new(),
            next_handle: 0,
        }
    }

    /// Starts an attempt: validates the request and reserves exactly one id.
    ///
    /// # Errors
    /// * `Configuration` - the request is invalid; nothing was sent
    /// * `Transport` - the reservation could not be sent, or the connection
    ///   reused a request id (the attempt is then recorded as failed)
    pub fn begin<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        now: Duration,
        request: CreationRequest,
    ) -> Result<CreationHandle, WorkerError> {
        let template = request.assemble()?;

        let request_id = conn.send_reserve_entity_ids(1, self.reservation_timeout)?;
        let handle = CreationHandle(self.next_handle);
        self.next_handle += 1;

        self.attempts.insert(
            handle,
            Attempt {
                template,
                state: CreationState::Idle,
            },
        );

        if let Err(e) = self
            .pending
            .insert(request_id, FactoryOp::Reserve(handle), now, Some(self.reservation_timeout))
        {
            let e = WorkerError::from(e);
            error!("{}: reservation {} cannot be tracked: {}", handle, request_id, e);
            self.finish(handle, CreationState::Failed, Err(e.clone()));
            return Err(e);
        }

        debug!("{}: reserving entity id ({})", handle, request_id);
        Ok(handle)
    }

    /// Handles a reservation response. On success the creation request for
    /// the reserved id is sent immediately.
    ///
    /// # Errors
    /// `Transport` if the creation request could not be sent (the attempt is
    /// also marked failed).
    pub fn on_reserve_response<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        now: Duration,
        request_id: RequestId,
        status: StatusCode,
        message: &str,
        first_entity_id: Option<EntityId>,
    ) -> Result<(), WorkerError> {
        let handle = match self.pending.resolve(request_id) {
            Some(pending) => match pending.operation {
                FactoryOp::Reserve(handle) => handle,
                other => {
                    warn!("Reservation response {} matched a {} request; dropped", request_id, other.operation());
                    return Ok(());
                }
            },
            None => {
                warn!("Reservation response {} has no pending request; dropped", request_id);
                return Ok(());
            }
        };

        let entity_id = match (status.is_success(), first_entity_id) {
            (true, Some(id)) => id,
            (true, None) => {
                self.fail(
                    conn,
                    handle,
                    RequestOperation::ReserveEntityIds,
                    StatusCode::InternalError,
                    "reservation succeeded without an entity id",
                );
                return Ok(());
            }
            (false, _) => {
                self.fail(conn, handle, RequestOperation::ReserveEntityIds, status, message);
                return Ok(());
            }
        };

        let template = match self.attempts.get_mut(&handle) {
            Some(attempt) => {
                attempt.state = CreationState::IdReserved(entity_id);
                attempt.template.clone()
            }
            None => return Ok(()),
        };

        let sent = conn
            .send_create_entity(template, entity_id, self.creation_timeout)
            .map_err(WorkerError::from)
            .and_then(|create_id| {
                self.pending
                    .insert(create_id, FactoryOp::Create(handle, entity_id), now, Some(self.creation_timeout))
                    .map_err(WorkerError::from)
            });

        if let Err(e) = sent {
            error!("{}: failed to send creation for entity {}: {}", handle, entity_id, e);
            self.finish(handle, CreationState::Failed, Err(e.clone()));
            return Err(e);
        }

        debug!("{}: reserved entity {}, creating", handle, entity_id);
        Ok(())
    }

    /// Handles a creation response.
    pub fn on_create_response<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        request_id: RequestId,
        status: StatusCode,
        message: &str,
        entity_id: Option<EntityId>,
    ) {
        let (handle, reserved) = match self.pending.resolve(request_id) {
            Some(pending) => match pending.operation {
                FactoryOp::Create(handle, reserved) => (handle, reserved),
                other => {
                    warn!("Creation response {} matched a {} request; dropped", request_id, other.operation());
                    return;
                }
            },
            None => {
                warn!("Creation response {} has no pending request; dropped", request_id);
                return;
            }
        };

        if !status.is_success() {
            self.fail(conn, handle, RequestOperation::CreateEntity, status, message);
            return;
        }

        if let Some(id) = entity_id.filter(|id| *id != reserved) {
            warn!("{}: coordinator reported entity {} for reserved id {}", handle, id, reserved);
        }

        info!("{}: created entity {}", handle, reserved);
        conn.send_log_message(LogLevel::Debug, LOGGER, &format!("Successfully created entity {}", reserved));
        self.finish(handle, CreationState::Created(reserved), Ok(reserved));
    }

    /// Fails every attempt whose in-flight request passed its deadline.
    pub fn expire<C: Connection + ?Sized>(&mut self, conn: &C, now: Duration) {
        for pending in self.pending.expire(now) {
            let timeout = match pending.operation {
                FactoryOp::Reserve(_) => self.reservation_timeout,
                FactoryOp::Create(_, _) => self.creation_timeout,
            };
            self.fail(
                conn,
                pending.operation.handle(),
                pending.operation.operation(),
                StatusCode::Timeout,
                &format!("no response within {}ms", timeout.as_millis()),
            );
        }
    }

    /// Current state of an attempt. Terminal attempts are forgotten once
    /// their outcome has been drained.
    pub fn state(&self, handle: CreationHandle) -> Option<CreationState> {
        self.attempts.get(&handle).map(|a| a.state)
    }

    /// Number of attempts that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.attempts.values().filter(|a| !a.state.is_terminal()).count()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Takes the outcomes reached since the last call and forgets the
    /// corresponding attempts.
    pub fn drain_outcomes(&mut self) -> Vec<CreationOutcome> {
        self.attempts.retain(|_, attempt| !attempt.state.is_terminal());
        std::mem::take(&mut self.outcomes)
    }

    fn fail<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        handle: CreationHandle,
        operation: RequestOperation,
        status: StatusCode,
        message: &str,
    ) {
        error!("{}: {} failed ({}): {}", handle, operation, status, message);
        conn.send_log_message(
            LogLevel::Error,
            LOGGER,
            &format!("Failed to {}: {}", operation, message),
        );
        self.finish(
            handle,
            CreationState::Failed,
            Err(WorkerError::RequestFailed {
                operation,
                status,
                message: message.to_string(),
            }),
        );
    }

    fn finish(&mut self, handle: CreationHandle, state: CreationState, result: Result<EntityId, WorkerError>) {
        if let Some(attempt) = self.attempts.get_mut(&handle) {
            attempt.state = state;
        }
        self.outcomes.push(CreationOutcome { handle, result });
    }
}
