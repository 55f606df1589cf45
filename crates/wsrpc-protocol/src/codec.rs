//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The engine never touches `serde_json` directly for framing: it asks
//! its [`Codec`] for bytes, which keeps the door open for a different
//! wire encoding with the same message model.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{classify, Message, ParseError, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every task a session spawns.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// Decodes one frame into a classified [`Message`].
///
/// Bytes that are not JSON at all become a -32700 rejection with a null id;
/// JSON that is not a valid message is rejected by [`classify`].
pub fn decode_message<C: Codec>(codec: &C, data: &[u8]) -> Result<Message, ParseError> {
    let value: Value = codec
        .decode(data)
        .map_err(|e| ParseError::parse_error(e.to_string()))?;
    classify(value)
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`). The default.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use wsrpc_protocol::{Codec, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let request = Message::request(1.into(), "sum", Some(json!([2, 3])));
///
/// let bytes = codec.encode(&request).unwrap();
/// let decoded = wsrpc_protocol::decode_message(&codec, &bytes).unwrap();
/// assert_eq!(request, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
