//! In-flight request table.
//!
//! Removal from the table is the single point that decides whether a reply
//! still counts: whoever takes the entry out owns its terminal transition.

use crate::{BridgeError, CancelReason, ConnectionId, Payload};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Terminal result delivered to a waiting caller.
pub type Outcome = Result<Payload, BridgeError>;

struct PendingEntry {
    slot: oneshot::Sender<Outcome>,
    created_at: Instant,
    /// Connection the request was written on.
    connection: ConnectionId,
}

/// Maps correlation ids to single-assignment completion slots.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovered poisoned pending-request table");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Register `id` and return the receiving side of its completion slot.
    pub fn insert(
        &self,
        id: &str,
        connection: ConnectionId,
    ) -> Result<oneshot::Receiver<Outcome>, BridgeError> {
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return Err(BridgeError::DuplicateId(id.to_string()));
        }
        let (slot, receiver) = oneshot::channel();
        entries.insert(
            id.to_string(),
            PendingEntry {
                slot,
                created_at: Instant::now(),
                connection,
            },
        );
        Ok(receiver)
    }

    /// Take `id` out of the table and deliver `outcome` to its waiter.
    ///
    /// Returns `false` if no such entry exists; that is logged, not an error.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            tracing::warn!(%id, "received reply for unknown or completed request");
            return false;
        };
        if entry.slot.send(outcome).is_err() {
            tracing::debug!(%id, "waiter went away before its reply was delivered");
        }
        true
    }

    /// Drop `id` without resolving it. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Record that `id` went out on a different connection than expected.
    pub fn retag(&self, id: &str, connection: ConnectionId) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.connection = connection;
        }
    }

    /// Cancel only the entries written on `connection`.
    pub fn sweep_connection(&self, connection: ConnectionId, reason: CancelReason) -> usize {
        self.sweep_where(|entry| entry.connection == connection, reason)
    }

    /// Cancel the entries written on `connection` or on any connection
    /// accepted before it. Entries on later connections are left alone.
    pub fn sweep_through(&self, connection: ConnectionId, reason: CancelReason) -> usize {
        self.sweep_where(|entry| entry.connection <= connection, reason)
    }

    fn sweep_where(&self, matches: impl Fn(&PendingEntry) -> bool, reason: CancelReason) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut entries = self.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| matches(entry))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        cancel_all(drained, reason)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Age of the longest-waiting request.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.lock()
            .values()
            .map(|entry| entry.created_at.elapsed())
            .max()
    }
}

fn cancel_all(entries: Vec<PendingEntry>, reason: CancelReason) -> usize {
    let count = entries.len();
    for entry in entries {
        let _ = entry.slot.send(Err(BridgeError::Cancelled(reason)));
    }
    count
}
