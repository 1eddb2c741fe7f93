//! JSON-backed `MessageCodec` adapter
//!
//! Messages are compact JSON. Seeking walks the object token-by-token and
//! returns the byte position where a field's value starts, so callers can
//! classify or decode one field without materializing the whole record.

use serde::Deserialize;
use serde_json::Value;

use super::{CodecError, CodecResult, EncodedType, FieldPos, MessageCodec};

/// Codec over compact JSON message bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonCodec {
    fn seek_field(&self, buf: &[u8], at: FieldPos, field: &str) -> Option<FieldPos> {
        let mut pos = skip_ws(buf, at.0)?;
        if buf.get(pos) != Some(&b'{') {
            return None;
        }
        pos += 1;

        loop {
            pos = skip_ws(buf, pos)?;
            match buf.get(pos)? {
                b'}' => return None,
                b',' => {
                    pos += 1;
                    continue;
                }
                b'"' => {}
                _ => return None,
            }

            let (key, after_key) = parse_string(buf, pos)?;
            pos = skip_ws(buf, after_key)?;
            if buf.get(pos) != Some(&b':') {
                return None;
            }
            pos = skip_ws(buf, pos + 1)?;

            if key == field {
                return Some(FieldPos(pos));
            }
            pos = skip_value(buf, pos)?;
        }
    }

    fn encoded_type(&self, buf: &[u8], at: FieldPos) -> CodecResult<EncodedType> {
        let pos = skip_ws(buf, at.0).ok_or_else(|| decode_err(at.0, "end of buffer"))?;
        match buf[pos] {
            b'"' => Ok(EncodedType::String),
            b'{' => Ok(EncodedType::Object),
            b'[' => Ok(EncodedType::Array),
            b't' | b'f' => Ok(EncodedType::Bool),
            b'n' => Ok(EncodedType::Null),
            b'-' | b'0'..=b'9' => Ok(EncodedType::Number),
            other => Err(decode_err(pos, format!("unexpected byte 0x{:02x}", other))),
        }
    }

    fn decode_at(&self, buf: &[u8], at: FieldPos) -> CodecResult<Value> {
        let pos = skip_ws(buf, at.0).ok_or_else(|| decode_err(at.0, "end of buffer"))?;
        let mut de = serde_json::Deserializer::from_slice(&buf[pos..]);
        Value::deserialize(&mut de).map_err(|e| decode_err(pos, e.to_string()))
    }

    fn encode(&self, msg: &Value) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

fn decode_err(at: usize, reason: impl Into<String>) -> CodecError {
    CodecError::Decode {
        at,
        reason: reason.into(),
    }
}

fn skip_ws(buf: &[u8], mut pos: usize) -> Option<usize> {
    while matches!(buf.get(pos)?, b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    Some(pos)
}

/// Parse the string starting at `pos` (which must hold `"`), returning its
/// unescaped contents and the position just past the closing quote.
fn parse_string(buf: &[u8], pos: usize) -> Option<(String, usize)> {
    debug_assert_eq!(buf.get(pos), Some(&b'"'));
    let mut out = Vec::new();
    let mut i = pos + 1;

    loop {
        match *buf.get(i)? {
            b'"' => {
                return Some((String::from_utf8(out).ok()?, i + 1));
            }
            b'\\' => {
                i += 1;
                match *buf.get(i)? {
                    b'u' => {
                        // Key names in messages are ASCII; unicode escapes
                        // only need to be skipped, not interpreted.
                        out.push(b'?');
                        i += 5;
                    }
                    escaped => {
                        out.push(escaped);
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
}

/// Skip past the complete value starting at `pos`.
fn skip_value(buf: &[u8], pos: usize) -> Option<usize> {
    match *buf.get(pos)? {
        b'"' => {
            let (_, after) = parse_string(buf, pos)?;
            Some(after)
        }
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut i = pos;
            loop {
                match *buf.get(i)? {
                    b'"' => {
                        let (_, after) = parse_string(buf, i)?;
                        i = after;
                    }
                    byte => {
                        if byte == b'{' || byte == b'[' {
                            depth += 1;
                        } else if byte == b'}' || byte == b']' {
                            depth -= 1;
                            if depth == 0 {
                                return Some(i + 1);
                            }
                        }
                        i += 1;
                    }
                }
            }
        }
        _ => {
            // Number, boolean, or null: runs until a structural delimiter.
            let mut i = pos;
            while let Some(&byte) = buf.get(i) {
                if matches!(byte, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
                    break;
                }
                i += 1;
            }
            Some(i)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value) -> Vec<u8> {
        JsonCodec::new().encode(value).unwrap()
    }

    #[test]
    fn seek_top_level_field() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({"author": "@alice", "sequence": 3}));

        let pos = codec.seek_field(&buf, FieldPos::ROOT, "sequence").unwrap();
        assert_eq!(codec.decode_at(&buf, pos).unwrap(), json!(3));
    }

    #[test]
    fn seek_nested_field_via_returned_position() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({
            "offset": 7,
            "value": {"author": "@bob", "content": {"type": "post"}}
        }));

        let value_pos = codec.seek_field(&buf, FieldPos::ROOT, "value").unwrap();
        let author_pos = codec.seek_field(&buf, value_pos, "author").unwrap();
        assert_eq!(codec.decode_at(&buf, author_pos).unwrap(), json!("@bob"));
    }

    #[test]
    fn missing_field_is_none() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({"a": 1}));
        assert!(codec.seek_field(&buf, FieldPos::ROOT, "b").is_none());
    }

    #[test]
    fn seek_skips_strings_containing_braces_and_escapes() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({
            "tricky": "a\"b}{][",
            "target": true
        }));

        let pos = codec.seek_field(&buf, FieldPos::ROOT, "target").unwrap();
        assert_eq!(codec.decode_at(&buf, pos).unwrap(), json!(true));
    }

    #[test]
    fn seek_skips_nested_containers() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({
            "deep": {"a": [1, {"b": 2}], "c": {"d": [3]}},
            "after": "yes"
        }));

        let pos = codec.seek_field(&buf, FieldPos::ROOT, "after").unwrap();
        assert_eq!(codec.decode_at(&buf, pos).unwrap(), json!("yes"));
    }

    #[test]
    fn encoded_type_discriminates_primitives() {
        let codec = JsonCodec::new();
        let buf = encode(&json!({
            "s": "x", "n": -4.5, "b": false, "z": null, "o": {}, "a": []
        }));

        let type_of = |field: &str| {
            let pos = codec.seek_field(&buf, FieldPos::ROOT, field).unwrap();
            codec.encoded_type(&buf, pos).unwrap()
        };
        assert_eq!(type_of("s"), EncodedType::String);
        assert_eq!(type_of("n"), EncodedType::Number);
        assert_eq!(type_of("b"), EncodedType::Bool);
        assert_eq!(type_of("z"), EncodedType::Null);
        assert_eq!(type_of("o"), EncodedType::Object);
        assert_eq!(type_of("a"), EncodedType::Array);
    }

    #[test]
    fn decode_at_root_round_trips() {
        let codec = JsonCodec::new();
        let msg = json!({"value": {"content": "ciphertext.box2"}});
        let buf = encode(&msg);
        assert_eq!(codec.decode_at(&buf, FieldPos::ROOT).unwrap(), msg);
    }

    #[test]
    fn seek_on_non_object_is_none() {
        let codec = JsonCodec::new();
        let buf = encode(&json!([1, 2, 3]));
        assert!(codec.seek_field(&buf, FieldPos::ROOT, "x").is_none());
    }
}
