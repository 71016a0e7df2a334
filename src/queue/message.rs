//! Frame message envelope
//!
//! Frames travel through the queue as MessagePack maps with three named
//! fields (`name`, `category`, `data`), so any MessagePack reader can parse
//! them without a schema.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::{StreamId, StreamStatus};

/// A named, categorized compressed image
///
/// This is designed to be cheap to clone: `data` is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    name: String,
    category: String,
    data: Bytes,
}

impl FrameMessage {
    pub fn new(name: impl Into<String>, category: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            data,
        }
    }

    /// Originating stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inference category
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Compressed image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Identity of this frame's stream at the given stage
    pub fn stream_id(&self, status: StreamStatus) -> StreamId {
        StreamId::new(self.name.clone(), self.category.clone(), status)
    }

    /// Pack into the binary envelope
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(self)?))
    }

    /// Unpack a binary envelope
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let msg = FrameMessage::new("cam-0", "face", Bytes::from_static(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]));
        let decoded = FrameMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.name(), "cam-0");
        assert_eq!(decoded.category(), "face");
        assert_eq!(decoded.data().as_ref(), &[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
    }

    #[test]
    fn test_round_trip_empty_data() {
        let msg = FrameMessage::new("", "car", Bytes::new());
        assert_eq!(FrameMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_envelope_is_named_map() {
        let msg = FrameMessage::new("n", "c", Bytes::from_static(b"\x01"));
        let encoded = msg.encode().unwrap();

        // fixmap with 3 entries, first key "name"
        assert_eq!(encoded[0], 0x83);
        assert_eq!(&encoded[1..6], b"\xa4name");
        // data is a bin 8 value, not an array of integers
        assert_eq!(&encoded[encoded.len() - 3..], b"\xc4\x01\x01");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(FrameMessage::decode(b"\x01\x02\x03").is_err());
        assert!(FrameMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_stream_id() {
        let msg = FrameMessage::new("cam-0", "body", Bytes::new());
        assert_eq!(msg.stream_id(StreamStatus::Inferred).to_string(), "cam-0:body:inferred");
    }
}
