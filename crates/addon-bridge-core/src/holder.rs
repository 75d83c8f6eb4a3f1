//! Ownership of the single active peer connection.

use crate::{BridgeError, ConnectionState};
use futures_util::future::{self, BoxFuture};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Error type produced by transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Write half of a duplex text-frame transport.
pub trait FrameSink: Send {
    /// Transmit one text frame.
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<(), BoxError>>;

    /// Best-effort shutdown of the write half.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(future::ready(()))
    }
}

/// In-memory transport: frames are pushed onto a channel.
impl FrameSink for mpsc::UnboundedSender<String> {
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<(), BoxError>> {
        let result = self
            .send(frame)
            .map_err(|_| BoxError::from("frame receiver closed"));
        Box::pin(future::ready(result))
    }
}

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Result of [`ConnectionHolder::detach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The active connection was cleared.
    Active,
    /// A connection that had already been replaced went away.
    Stale,
    /// Nothing was attached.
    Absent,
}

/// Failure of [`ConnectionHolder::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// No connection was attached.
    NotConnected,
    /// The send on `connection` failed and the connection was cleared.
    Broken {
        connection: ConnectionId,
        reason: String,
    },
}

impl From<WriteError> for BridgeError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::NotConnected => Self::NotConnected,
            WriteError::Broken { reason, .. } => Self::Transport(reason),
        }
    }
}

struct ActiveConnection {
    id: ConnectionId,
    sink: Box<dyn FrameSink>,
}

/// Holds the active connection and serializes writes against teardown.
///
/// The write half lives behind an async mutex so a caller never writes to a
/// handle that is being detached. Connectivity queries read an atomic and
/// never wait on that mutex.
pub struct ConnectionHolder {
    active: Mutex<Option<ActiveConnection>>,
    /// Raw id of the active connection, 0 when disconnected.
    current: AtomicU64,
    next_id: AtomicU64,
}

impl Default for ConnectionHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHolder {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            current: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make `sink` the active connection, replacing any previous one.
    ///
    /// The replaced handle is dropped; requests already written on it stay
    /// pending.
    pub async fn attach(&self, sink: Box<dyn FrameSink>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut active = self.active.lock().await;
        if let Some(previous) = active.replace(ActiveConnection { id, sink }) {
            tracing::info!(replaced = %previous.id, connection = %id, "peer connection replaced");
        } else {
            tracing::info!(connection = %id, "peer connection established");
        }
        self.current.store(id.0, Ordering::SeqCst);
        id
    }

    /// Clear `connection` if it is the active one. Idempotent.
    pub async fn detach(&self, connection: ConnectionId) -> Detach {
        let mut active = self.active.lock().await;
        match active.as_ref().map(|a| a.id) {
            Some(id) if id == connection => {
                self.current.store(0, Ordering::SeqCst);
                if let Some(mut previous) = active.take() {
                    previous.sink.close().await;
                }
                tracing::info!(%connection, "peer connection closed");
                Detach::Active
            }
            Some(_) => Detach::Stale,
            None => Detach::Absent,
        }
    }

    /// Send `frame` on the active connection.
    ///
    /// Returns the id of the connection the frame went out on. A failing
    /// send clears the connection before the error is returned.
    pub async fn write(&self, frame: String) -> Result<ConnectionId, WriteError> {
        let mut active = self.active.lock().await;
        let Some(connection) = active.as_mut() else {
            tracing::warn!("no active peer connection to send message");
            return Err(WriteError::NotConnected);
        };
        let id = connection.id;
        match connection.sink.send_frame(frame).await {
            Ok(()) => Ok(id),
            Err(e) => {
                tracing::error!(connection = %id, "failed to send message to peer: {e}");
                *active = None;
                self.current.store(0, Ordering::SeqCst);
                Err(WriteError::Broken {
                    connection: id,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.load(Ordering::SeqCst) != 0
    }

    /// Id of the active connection, if any.
    pub fn current(&self) -> Option<ConnectionId> {
        match self.current.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(ConnectionId(raw)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.current()
            .map_or(ConnectionState::Disconnected, ConnectionState::Connected)
    }
}
