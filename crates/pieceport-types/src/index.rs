//! Index records and write acknowledgements.

use serde::{Deserialize, Serialize};

/// One payload-block location inside a piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Payload block CID.
    pub cid: String,
    /// Byte offset of the block within the piece.
    pub offset: u64,
    /// Block length in bytes.
    pub size: u64,
}

impl IndexRecord {
    #[must_use]
    pub fn new(cid: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            cid: cid.into(),
            offset,
            size,
        }
    }
}

/// Acknowledgement for one chunk of an index write.
///
/// A destination may split a large index into several internal writes;
/// each yields one ack. A non-empty `error` marks the chunk as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexWriteAck {
    /// Records covered by this chunk.
    pub records: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl IndexWriteAck {
    #[must_use]
    pub fn ok(records: u64) -> Self {
        Self {
            records,
            error: String::new(),
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            records: 0,
            error: error.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_error_is_non_empty_string() {
        assert!(!IndexWriteAck::ok(10).is_error());
        assert!(IndexWriteAck::failed("constraint violation").is_error());
        assert!(!IndexWriteAck::failed("").is_error());
    }

    #[test]
    fn ok_ack_omits_error_field() {
        let json = serde_json::to_string(&IndexWriteAck::ok(3)).unwrap();
        assert_eq!(json, r#"{"records":3}"#);
    }
}
