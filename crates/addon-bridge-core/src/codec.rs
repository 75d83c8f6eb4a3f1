//! Text-frame encoding of [`Envelope`]s.

use crate::Envelope;

/// Error encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize an envelope into one text frame.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Parse one text frame into an envelope.
pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(frame).map_err(CodecError::Malformed)
}
