//! Failure taxonomy surfaced to callers of the broker.

use crate::CodecError;
use std::time::Duration;

/// Why a request ended without a reply.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No peer connection is active.
    #[error("no peer connection is established")]
    NotConnected,
    /// The frame could not be handed to the transport.
    #[error("failed to send request to peer: {0}")]
    Transport(String),
    /// The peer did not reply in time.
    #[error("no reply from peer within {0:?}")]
    Timeout(Duration),
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    /// The peer answered with `status: "error"`.
    #[error("{0}")]
    Remote(String),
    #[error("request id {0} is already in flight")]
    DuplicateId(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Cause of a [`BridgeError::Cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelReason {
    /// The connection dropped while the request was in flight.
    #[error("connection to peer lost")]
    ConnectionLost,
    /// The caller stopped waiting.
    #[error("caller abandoned the request")]
    Aborted,
}
