//! Correlation of outbound requests with inbound replies.

use crate::codec;
use crate::{
    BridgeError, BridgeStatus, CancelReason, ConnectionHolder, ConnectionId, ConnectionState,
    Detach, Envelope, FrameSink, Kind, Outcome, Payload, PendingTable, WriteError,
};
use std::future;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Default bound on how long a caller waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Broker settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Used when a caller does not pass its own timeout.
    pub request_timeout: Duration,
    /// Buffer size of the control-frame broadcast channel.
    pub control_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            control_capacity: 16,
        }
    }
}

/// What [`Broker::ingest`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// A waiting caller was resolved.
    Resolved,
    /// A reply whose id is not (or no longer) pending.
    Unmatched,
    /// A control frame, handed to control subscribers.
    Control,
    /// A frame of a kind the broker does not route.
    Ignored,
    /// The frame did not decode.
    Malformed,
}

/// A resolved reply together with the id it was correlated by.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: String,
    pub payload: Payload,
}

/// Bridges many callers to the one peer behind the active connection.
///
/// Construct one per process and share it behind an `Arc` between the
/// request surface and the connection's receive loop.
pub struct Broker {
    holder: ConnectionHolder,
    pending: PendingTable,
    config: BrokerConfig,
    control_tx: broadcast::Sender<Envelope>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let (control_tx, _) = broadcast::channel(config.control_capacity.max(1));
        Self {
            holder: ConnectionHolder::new(),
            pending: PendingTable::new(),
            config,
            control_tx,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register a newly accepted connection.
    pub async fn attach(&self, sink: impl FrameSink + 'static) -> ConnectionId {
        self.holder.attach(Box::new(sink)).await
    }

    /// Handle the end of `connection`.
    ///
    /// Losing the active connection cancels every request written on it or
    /// on an earlier connection. Losing a connection that was already
    /// replaced cancels only the requests that went out on it.
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        match self.holder.detach(connection).await {
            Detach::Active => {
                // A connection attached after the detach keeps its requests.
                let cancelled = self
                    .pending
                    .sweep_through(connection, CancelReason::ConnectionLost);
                if cancelled > 0 {
                    tracing::warn!(%connection, cancelled, "cancelled pending requests");
                }
            }
            Detach::Stale => {
                let cancelled = self
                    .pending
                    .sweep_connection(connection, CancelReason::ConnectionLost);
                tracing::info!(%connection, cancelled, "replaced peer connection closed");
            }
            Detach::Absent => {
                tracing::debug!(%connection, "disconnect for connection that is already gone");
            }
        }
    }

    /// Send `payload` to the peer and wait for the correlated reply.
    ///
    /// `timeout` falls back to [`BrokerConfig::request_timeout`]. Dropping
    /// the returned future retires the request.
    pub async fn send_and_await(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<Payload, BridgeError> {
        self.send_and_await_until(payload, timeout, future::pending())
            .await
    }

    /// Like [`send_and_await`](Self::send_and_await), but gives up with
    /// [`CancelReason::Aborted`] as soon as `cancel` completes.
    pub async fn send_and_await_until(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
        cancel: impl Future<Output = ()>,
    ) -> Result<Payload, BridgeError> {
        self.exchange(payload, timeout, cancel)
            .await
            .map(|reply| reply.payload)
    }

    /// Full request/reply exchange, also reporting the correlation id that
    /// was assigned to the request.
    pub async fn exchange(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
        cancel: impl Future<Output = ()>,
    ) -> Result<Reply, BridgeError> {
        let Some(connection) = self.holder.current() else {
            return Err(BridgeError::NotConnected);
        };
        let envelope = Envelope::request(payload);
        let frame = codec::encode(&envelope)?;
        let id = envelope.id;

        let mut rx = self.pending.insert(&id, connection)?;
        let _guard = RetireOnDrop {
            pending: &self.pending,
            id: &id,
        };

        match self.holder.write(frame).await {
            Ok(written_on) if written_on != connection => self.pending.retag(&id, written_on),
            Ok(_) => {}
            Err(WriteError::Broken { connection: lost, reason }) => {
                let cancelled = self
                    .pending
                    .sweep_through(lost, CancelReason::ConnectionLost);
                tracing::warn!(connection = %lost, cancelled, "peer connection lost on write");
                return Err(BridgeError::Transport(reason));
            }
            Err(err) => return Err(err.into()),
        }
        tracing::debug!(%id, %connection, "request sent to peer");

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        tokio::pin!(cancel);
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, &mut rx) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(BridgeError::Cancelled(CancelReason::ConnectionLost)),
                Err(_) => {
                    tracing::error!(%id, ?timeout, "timed out waiting for reply");
                    self.settle(&id, &mut rx, BridgeError::Timeout(timeout))
                }
            },
            () = &mut cancel => {
                tracing::warn!(%id, "request abandoned by caller");
                self.settle(&id, &mut rx, BridgeError::Cancelled(CancelReason::Aborted))
            }
        };
        outcome.map(|payload| Reply { id: id.clone(), payload })
    }

    /// Retire `id` after the caller stopped waiting. If a reply won the race
    /// and already took the entry out, that reply is the outcome.
    fn settle(&self, id: &str, rx: &mut oneshot::Receiver<Outcome>, err: BridgeError) -> Outcome {
        if self.pending.remove(id) {
            return Err(err);
        }
        match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(err),
        }
    }

    /// Feed one raw inbound frame. Never fails; bad frames are logged.
    pub fn ingest(&self, frame: &str) -> Ingest {
        match codec::decode(frame) {
            Ok(envelope) => self.ingest_envelope(envelope),
            Err(e) => {
                tracing::error!("error parsing peer message: {e}");
                Ingest::Malformed
            }
        }
    }

    /// Route one decoded envelope.
    pub fn ingest_envelope(&self, envelope: Envelope) -> Ingest {
        match envelope.kind {
            Kind::Reply => {
                let outcome = match envelope.payload.failure_reason() {
                    Some(reason) => Err(BridgeError::Remote(reason)),
                    None => Ok(envelope.payload),
                };
                if self.pending.resolve(&envelope.id, outcome) {
                    tracing::info!(id = %envelope.id, "completed request");
                    Ingest::Resolved
                } else {
                    Ingest::Unmatched
                }
            }
            Kind::Control => {
                tracing::debug!(id = %envelope.id, payload = ?envelope.payload, "received control message");
                // No subscribers is fine.
                let _ = self.control_tx.send(envelope);
                Ingest::Control
            }
            Kind::Request | Kind::Unknown => {
                tracing::warn!(id = %envelope.id, kind = ?envelope.kind, "received unhandled message type");
                Ingest::Ignored
            }
        }
    }

    /// Subscribe to control frames (keep-alives and similar).
    pub fn subscribe_control(&self) -> broadcast::Receiver<Envelope> {
        self.control_tx.subscribe()
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.holder.is_connected(),
            pending: self.pending.len(),
            oldest_pending_ms: self
                .pending
                .oldest_age()
                .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.holder.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.holder.state()
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }
}

/// Removes a request from the table when its waiter goes away, whether it
/// finished, failed or was dropped mid-await.
struct RetireOnDrop<'a> {
    pending: &'a PendingTable,
    id: &'a str,
}

impl Drop for RetireOnDrop<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.id) {
            tracing::debug!(id = %self.id, "retired abandoned request");
        }
    }
}
