//! Trade Stream Codec
//!
//! Decodes Binance text frames into trade events. Raw-stream frames carry
//! the event object directly; combined-stream frames wrap it in an envelope.
//! Non-trade events decode to `None` so the caller can skip them.

use super::messages::{StreamEnvelope, TradeEvent};
use crate::infrastructure::codec::CodecError;

/// Decoder for Binance trade frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct TradeCodec;

impl TradeCodec {
    /// Create a new trade codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the frame is not a JSON object or a trade
    /// event is missing fields.
    pub fn decode(&self, text: &str) -> Result<Option<TradeEvent>, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let event = if value.get("stream").is_some() && value.get("data").is_some() {
            let envelope: StreamEnvelope<serde_json::Value> = serde_json::from_value(value)?;
            envelope.data
        } else {
            value
        };

        match event.get("e").and_then(serde_json::Value::as_str) {
            Some("trade") => Ok(Some(serde_json::from_value(event)?)),
            _ => Ok(None),
        }
    }
}
