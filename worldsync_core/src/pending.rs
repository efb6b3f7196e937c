//! In-flight request bookkeeping shared by the factory and the correlator.

use std::collections::BTreeMap;
use std::time::Duration;
use worldsync_env::{EnvError, RequestId};

/// A request that has been sent and not yet resolved.
///
/// Resolved or expired exactly once, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest<T> {
    pub id: RequestId,

    /// The semantic operation the request stands for
    pub operation: T,

    /// Context time the request was sent at
    pub issued_at: Duration,

    /// Context time after which the request resolves as timed out
    pub deadline: Option<Duration>,
}

impl<T> PendingRequest<T> {
    pub fn is_expired(&self, now: Duration) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

/// Pending requests keyed by id.
///
/// Ids handed out by a connection are strictly increasing; anything else is
/// treated as reuse and rejected.
#[derive(Debug)]
pub struct PendingRequests<T> {
    requests: BTreeMap<RequestId, PendingRequest<T>>,
    last_id: Option<RequestId>,
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self {
            requests: BTreeMap::new(),
            last_id: None,
        }
    }

    /// Tracks a freshly sent request.
    ///
    /// # Errors
    /// `EnvError::RequestIdReused` if `id` is not greater than every id seen before.
    pub fn insert(
        &mut self,
        id: RequestId,
        operation: T,
        issued_at: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), EnvError> {
        if self.last_id.map(|last| id <= last).unwrap_or(false) {
            return Err(EnvError::RequestIdReused(id.0));
        }
        self.last_id = Some(id);
        self.requests.insert(
            id,
            PendingRequest {
                id,
                operation,
                issued_at,
                deadline: timeout.map(|t| issued_at + t),
            },
        );
        Ok(())
    }

    /// Removes and returns the matching request, if still pending.
    pub fn resolve(&mut self, id: RequestId) -> Option<PendingRequest<T>> {
        self.requests.remove(&id)
    }

    /// Removes and returns every request whose deadline has passed, in id order.
    pub fn expire(&mut self, now: Duration) -> Vec<PendingRequest<T>> {
        let expired: Vec<RequestId> = self
            .requests
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest<T>> {
        self.requests.get(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest<T>> {
        self.requests.values()
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}
