//! Decrypted message reconstruction
//!
//! After a successful unbox the record is rebuilt with cleartext content
//! and a `meta {private, originalContent}` marker so the ciphertext can be
//! restored before the message leaves the trust boundary. Messages from a
//! bendy-butt feed carry their content as a `[content, signature]` pair;
//! the signature is split into its own field on reconstruction.

use serde_json::{json, Value};

use crate::codec::{FieldPos, MessageCodec};
use crate::log::LogRecord;

/// URI prefix of the one feed format whose unboxed content is a
/// two-element content/signature pair.
const BENDYBUTT_FEED_PREFIX: &str = "ssb:feed/bendybutt-v1/";

fn splits_content_signature(author: &Value) -> bool {
    author
        .as_str()
        .is_some_and(|a| a.starts_with(BENDYBUTT_FEED_PREFIX))
}

/// Rebuild a record with `cleartext` substituted for its content field.
///
/// `None` when the record's bytes cannot be decoded or re-encoded; the
/// caller then falls back to the unchanged record.
pub fn reconstruct_message<C: MessageCodec>(
    codec: &C,
    record: &LogRecord,
    cleartext: Value,
) -> Option<LogRecord> {
    let buf = record.value.as_ref()?;
    let mut msg = codec.decode_at(buf, FieldPos::ROOT).ok()?;

    let value = msg.get_mut("value")?;
    let original_content = value.get("content")?.clone();

    let split = value
        .get("author")
        .map(splits_content_signature)
        .unwrap_or(false);
    match cleartext {
        Value::Array(mut parts) if split && parts.len() == 2 => {
            let signature = parts.pop()?;
            let content = parts.pop()?;
            value["content"] = content;
            value["contentSignature"] = signature;
        }
        cleartext => {
            value["content"] = cleartext;
        }
    }

    msg["meta"] = json!({
        "private": true,
        "originalContent": original_content,
    });

    let bytes = codec.encode(&msg).ok()?;
    Some(LogRecord {
        offset: record.offset,
        value: Some(bytes),
    })
}

/// Restore the original ciphertext of a decrypted message and strip the
/// private marker. Messages without the marker pass through unchanged.
///
/// Anything serialized back out to peers must go through this first so
/// cleartext never leaves the trust boundary.
pub fn re_encrypt(mut msg: Value) -> Value {
    let is_private = msg
        .get("meta")
        .and_then(|meta| meta.get("private"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_private {
        return msg;
    }

    if let Some(mut meta) = msg.as_object_mut().and_then(|m| m.remove("meta")) {
        if let Some(original) = meta.get_mut("originalContent").map(Value::take) {
            if let Some(value) = msg.get_mut("value") {
                value["content"] = original;
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("contentSignature");
                }
            }
        }
    }
    msg
}
