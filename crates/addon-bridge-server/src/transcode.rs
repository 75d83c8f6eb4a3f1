//! Conversion of uploaded binary data into transportable text.

use base64::{Engine as _, engine::general_purpose};

/// Error encoding an upload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("upload is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Base64 encode `bytes` (standard alphabet, padded), enforcing `limit`.
pub fn encode_upload(bytes: &[u8], limit: usize) -> Result<String, TranscodeError> {
    if bytes.len() > limit {
        return Err(TranscodeError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }
    Ok(general_purpose::STANDARD.encode(bytes))
}
