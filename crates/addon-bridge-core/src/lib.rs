//! Request/reply correlation over a single persistent peer connection.
//!
//! Many callers share one duplex text-frame connection to a remote peer.
//! The [`Broker`] tags every outbound request with a fresh id, parks the
//! caller until the peer replies with the same id, and guarantees that every
//! waiter is released on timeout, cancellation or connection loss.

mod broker;
mod codec;
mod envelope;
mod error;
mod holder;
mod pending;
mod receive;

pub use broker::{Broker, BrokerConfig, DEFAULT_REQUEST_TIMEOUT, Ingest, Reply};
pub use codec::{CodecError, decode, encode};
pub use envelope::{
    Envelope, GeneratedImage, Kind, Payload, PromptPayload, ReplyRecord, ReplyStatus,
    UNKNOWN_REMOTE_ERROR,
};
pub use error::{BridgeError, CancelReason};
pub use holder::{BoxError, ConnectionHolder, ConnectionId, Detach, FrameSink, WriteError};
pub use pending::{Outcome, PendingTable};
pub use receive::{Frame, run_receive_loop};

use serde::{Deserialize, Serialize};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No peer is attached; sends fail fast.
    Disconnected,
    /// A peer is attached under the given id.
    Connected(ConnectionId),
}

/// Read-only view used for liveness and health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Whether a peer connection is currently active.
    pub connected: bool,
    /// Requests still waiting for a reply.
    pub pending: usize,
    /// How long the oldest pending request has waited, in milliseconds.
    pub oldest_pending_ms: Option<u64>,
}
