//! Snapshot Codec
//!
//! JSON framing for the outbound broadcast message. One snapshot becomes one
//! text frame holding `{"prices":[...]}` with numeric decimals.

use axum::extract::ws::Utf8Bytes;

use crate::domain::price::PriceSnapshot;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Encoder for price snapshot frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Create a new snapshot codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a snapshot into a text frame payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if serialization fails.
    pub fn encode(&self, snapshot: &PriceSnapshot) -> Result<Utf8Bytes, CodecError> {
        let json = serde_json::to_string(snapshot)?;
        Ok(Utf8Bytes::from(json))
    }

    /// Decode a text frame payload back into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the payload is not a JSON object carrying a
    /// `prices` array of valid price records.
    pub fn decode(&self, text: &str) -> Result<PriceSnapshot, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

// =============================================================================
// Tests
// =============================================================================
