//! Error types for the IR stream codec.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, IrError>;

/// Codec error type.
///
/// The codec reports errors structurally and never logs or retries. End of
/// stream is not an error: the decoder returns
/// [`Decoded::EndOfStream`](crate::decoder::Decoded) instead.
#[derive(Error, Debug)]
pub enum IrError {
    /// The reader ran out of bytes mid-record or mid-value. Retryable only
    /// if the caller can supply more bytes.
    #[error("incomplete stream: input exhausted at offset {0}")]
    IncompleteStream(usize),

    /// Tag byte not in the catalog for the current decode state.
    #[error("unknown tag 0x{tag:02x} at offset {position}")]
    UnknownTag { tag: u8, position: usize },

    /// Tag is valid but structurally inconsistent: type mismatch, duplicate
    /// schema node, wrong-order length prefix, oversized length, key id past
    /// the end of the schema.
    #[error("corrupt stream: {0}")]
    Corrupt(String),

    /// The CLP string subcodec rejected a payload.
    #[error("CLP string decode error: {0}")]
    Decode(String),

    /// Value out of encodable range, or the record contained a shape the
    /// schema tree cannot represent.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Preamble VERSION outside the supported semver range.
    #[error("unsupported protocol version {version:?} ({support:?})")]
    UnsupportedVersion {
        version: String,
        support: crate::metadata::VersionSupport,
    },

    /// API misuse, e.g. `decode_record` before `read_preamble`.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Metadata JSON failed to parse or serialize.
    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IrError {
    /// Create a corrupt-stream error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        IrError::Corrupt(msg.into())
    }

    /// Create a CLP decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        IrError::Decode(msg.into())
    }

    /// Create an encode-failure error
    pub fn encode_failed(msg: impl Into<String>) -> Self {
        IrError::EncodeFailed(msg.into())
    }

    /// Create a not-ready error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        IrError::NotReady(msg.into())
    }
}
