//! Binary message codec seam
//!
//! Records in the log are encoded messages. Decryption and projections
//! need to peek at single fields (`value`, `content`, `author`, ...)
//! without paying for a full decode of every record, so the codec exposes
//! a seek-by-field primitive returning a byte position, plus decode-at,
//! encoded-type-at, and whole-message encode. The production codec is an
//! external collaborator; `JsonCodec` is the in-process adapter used by
//! tests and lightweight hosts.

mod json;

pub use json::JsonCodec;

use serde_json::Value;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes at a position do not decode as a value.
    #[error("failed to decode value at byte {at}: {reason}")]
    Decode { at: usize, reason: String },

    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Byte position of a value inside an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPos(pub usize);

impl FieldPos {
    /// Position of the root value of a record.
    pub const ROOT: FieldPos = FieldPos(0);
}

/// Encoded primitive type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedType {
    String,
    Number,
    Bool,
    Null,
    Object,
    Array,
}

/// Field-level access to encoded messages.
pub trait MessageCodec {
    /// Position of `field`'s value inside the object starting at `at`.
    ///
    /// `None` when the field is absent or the bytes at `at` are not an
    /// object. Nested lookup is seeking again from a returned position.
    fn seek_field(&self, buf: &[u8], at: FieldPos, field: &str) -> Option<FieldPos>;

    /// Encoded primitive type of the value at `at`.
    fn encoded_type(&self, buf: &[u8], at: FieldPos) -> CodecResult<EncodedType>;

    /// Decode the value at `at`.
    fn decode_at(&self, buf: &[u8], at: FieldPos) -> CodecResult<Value>;

    /// Encode a full structured message to bytes.
    fn encode(&self, msg: &Value) -> CodecResult<Vec<u8>>;
}
