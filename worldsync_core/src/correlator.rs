//! Command Correlator - matches command responses to their requests.
//!
//! Each sent command becomes a pending request with a deadline on the
//! context clock. It is resolved exactly once: by a matching response, or
//! by [`CommandCorrelator::expire`] once the deadline passes. A response
//! that matches nothing (unknown, already resolved or already expired) is
//! logged and dropped without touching anything still pending.

use crate::error::{CommandError, CommandErrorKind, ConfigurationError, WorkerError};
use crate::pending::PendingRequests;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use worldsync_env::{CommandKind, CommandRequest, Connection, EntityId, RequestId, StatusCode};

/// Returned to the issuer of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHandle {
    pub request_id: RequestId,
    pub entity_id: EntityId,
    pub command: CommandKind,
}

/// A successful command response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub request_id: RequestId,
    pub entity_id: EntityId,
    pub command: CommandKind,
    pub response: Option<Value>,
}

/// Terminal state of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResolution {
    pub request_id: RequestId,
    pub result: Result<CommandResult, CommandError>,
}

#[derive(Debug, Clone)]
struct InFlight {
    entity_id: EntityId,
    command: CommandKind,
}

/// Tracks in-flight commands.
#[derive(Debug, Default)]
pub struct CommandCorrelator {
    pending: PendingRequests<InFlight>,
    resolutions: Vec<CommandResolution>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a command and starts tracking it.
    ///
    /// # Errors
    /// * `Configuration(ZeroTimeout)` - nothing is sent
    /// * `Transport` - the send failed or the connection reused an id
    pub fn send_command<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        now: Duration,
        entity_id: EntityId,
        command: CommandRequest,
        timeout: Duration,
    ) -> Result<RequestHandle, WorkerError> {
        if timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout.into());
        }

        let kind = command.kind.clone();
        let request_id = conn.send_command_request(entity_id, command, timeout)?;
        self.pending.insert(
            request_id,
            InFlight {
                entity_id,
                command: kind.clone(),
            },
            now,
            Some(timeout),
        )?;

        debug!("Sent {} to entity {} ({})", kind, entity_id, request_id);
        Ok(RequestHandle {
            request_id,
            entity_id,
            command: kind,
        })
    }

    /// Matches a response. Returns false if it matched nothing.
    pub fn on_response(
        &mut self,
        request_id: RequestId,
        status: StatusCode,
        message: &str,
        response: Option<Value>,
    ) -> bool {
        let Some(pending) = self.pending.resolve(request_id) else {
            warn!("Command response {} ({}) has no pending request; dropped", request_id, status);
            return false;
        };

        let InFlight { entity_id, command } = pending.operation;
        let result = match status {
            StatusCode::Success => Ok(CommandResult {
                request_id,
                entity_id,
                command,
                response,
            }),
            StatusCode::Timeout => Err(CommandError {
                request_id,
                entity_id,
                command,
                kind: CommandErrorKind::Timeout,
            }),
            status => Err(CommandError {
                request_id,
                entity_id,
                command,
                kind: CommandErrorKind::RemoteRejected {
                    status,
                    message: message.to_string(),
                },
            }),
        };

        if let Err(e) = &result {
            debug!("{}", e);
        }
        self.resolutions.push(CommandResolution { request_id, result });
        true
    }

    /// Times out every command past its deadline. Returns how many expired.
    pub fn expire(&mut self, now: Duration) -> usize {
        let expired = self.pending.expire(now);
        let count = expired.len();
        for pending in expired {
            let InFlight { entity_id, command } = pending.operation;
            debug!("Command {} to entity {} timed out ({})", command, entity_id, pending.id);
            self.resolutions.push(CommandResolution {
                request_id: pending.id,
                result: Err(CommandError {
                    request_id: pending.id,
                    entity_id,
                    command,
                    kind: CommandErrorKind::Timeout,
                }),
            });
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.pending.contains(request_id)
    }

    /// Takes the resolutions reached since the last call, in resolution order.
    pub fn drain_resolutions(&mut self) -> Vec<CommandResolution> {
        std::mem::take(&mut self.resolutions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;
    use worldsync_env::ComponentKind;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn got_shot() -> CommandRequest {
        CommandRequest::new(CommandKind::new(ComponentKind(1002), "got_shot"), serde_json::json!({}))
    }

    #[test]
    fn test_success_resolves() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();
        let handle = correlator
            .send_command(&conn, Duration::ZERO, EntityId(4), got_shot(), TIMEOUT)
            .unwrap();

        assert!(correlator.is_pending(handle.request_id));
        assert!(correlator.on_response(
            handle.request_id,
            StatusCode::Success,
            "",
            Some(serde_json::json!({ "dialogue": "ouch" }))
        ));

        let resolutions = correlator.drain_resolutions();
        assert_eq!(resolutions.len(), 1);
        let result = resolutions[0].result.as_ref().unwrap();
        assert_eq!(result.entity_id, EntityId(4));
        assert_eq!(result.response, Some(serde_json::json!({ "dialogue": "ouch" })));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_remote_rejection() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();
        let handle = correlator
            .send_command(&conn, Duration::ZERO, EntityId(4), got_shot(), TIMEOUT)
            .unwrap();

        correlator.on_response(handle.request_id, StatusCode::NotFound, "no such entity", None);

        let resolutions = correlator.drain_resolutions();
        let err = resolutions[0].result.as_ref().unwrap_err();
        assert_eq!(
            err.kind,
            CommandErrorKind::RemoteRejected {
                status: StatusCode::NotFound,
                message: "no such entity".to_string(),
            }
        );
    }

    #[test]
    fn test_stale_response_leaves_pending_untouched() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();
        let a = correlator
            .send_command(&conn, Duration::ZERO, EntityId(1), got_shot(), TIMEOUT)
            .unwrap();
        let b = correlator
            .send_command(&conn, Duration::ZERO, EntityId(2), got_shot(), TIMEOUT)
            .unwrap();

        assert!(!correlator.on_response(RequestId(999), StatusCode::Success, "", None));

        assert_eq!(correlator.pending_count(), 2);
        assert!(correlator.is_pending(a.request_id));
        assert!(correlator.is_pending(b.request_id));
        assert!(correlator.drain_resolutions().is_empty());
    }

    #[test]
    fn test_timeout_then_late_response() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();
        let handle = correlator
            .send_command(&conn, Duration::ZERO, EntityId(1), got_shot(), TIMEOUT)
            .unwrap();

        assert_eq!(correlator.expire(Duration::from_millis(499)), 0);
        assert_eq!(correlator.expire(TIMEOUT), 1);

        let resolutions = correlator.drain_resolutions();
        assert!(resolutions[0].result.as_ref().unwrap_err().is_timeout());

        // Exactly once: the late response matches nothing
        assert!(!correlator.on_response(handle.request_id, StatusCode::Success, "", None));
        assert!(correlator.drain_resolutions().is_empty());
    }

    #[test]
    fn test_transport_timeout_status() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();
        let handle = correlator
            .send_command(&conn, Duration::ZERO, EntityId(1), got_shot(), TIMEOUT)
            .unwrap();

        correlator.on_response(handle.request_id, StatusCode::Timeout, "timed out", None);
        let resolutions = correlator.drain_resolutions();
        assert!(resolutions[0].result.as_ref().unwrap_err().is_timeout());
    }

    #[test]
    fn test_zero_timeout_rejected_locally() {
        let conn = MockConnection::new();
        let mut correlator = CommandCorrelator::new();

        let err = correlator
            .send_command(&conn, Duration::ZERO, EntityId(1), got_shot(), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, WorkerError::Configuration(ConfigurationError::ZeroTimeout));
        assert!(conn.sent().is_empty());
    }
}
