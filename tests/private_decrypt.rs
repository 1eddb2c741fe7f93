//! Private content index tests
//!
//! Exercises decrypt-on-read over a streamed log, the offset-set
//! bookkeeping behind it, the legacy-form cutover policy, and snapshot
//! persistence across restarts.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use ripplelog::clock::ManualClock;
use ripplelog::codec::{FieldPos, JsonCodec, MessageCodec};
use ripplelog::log::LogRecord;
use ripplelog::private::{re_encrypt, PrivateConfig, PrivateIndex, ReadySignal, Unboxer};
use serde_json::{json, Value};
use tempfile::tempdir;

// =============================================================================
// Helpers
// =============================================================================

/// Unboxer whose "key material" is a pair of booleans: which envelope
/// forms this identity can open. Payloads are base64 JSON.
struct TestUnboxer {
    can_open_box1: bool,
    can_open_box2: bool,
    ready: Arc<ReadySignal>,
}

impl TestUnboxer {
    fn new(can_open_box1: bool, can_open_box2: bool) -> Self {
        Self {
            can_open_box1,
            can_open_box2,
            ready: Arc::new(ReadySignal::resolved()),
        }
    }

    fn decode_payload(ciphertext: &str, suffix: &str) -> Option<Value> {
        let payload = ciphertext.strip_suffix(suffix)?;
        let bytes = STANDARD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl Unboxer for TestUnboxer {
    fn unbox_box1(&self, ciphertext: &str) -> Option<Value> {
        if !self.can_open_box1 {
            return None;
        }
        Self::decode_payload(ciphertext, ".box")
    }

    fn unbox_box2(&self, ciphertext: &str, author: &Value, _previous: &Value) -> Option<Value> {
        // The additional authenticated context must have been located on
        // the undecoded record before this is ever called.
        author.as_str()?;
        if !self.can_open_box2 {
            return None;
        }
        Self::decode_payload(ciphertext, ".box2")
    }

    fn ready(&self) -> &ReadySignal {
        &self.ready
    }
}

fn box1(content: &Value) -> String {
    format!("{}.box", STANDARD.encode(serde_json::to_vec(content).unwrap()))
}

fn box2(content: &Value) -> String {
    format!("{}.box2", STANDARD.encode(serde_json::to_vec(content).unwrap()))
}

fn record(offset: u64, author: &str, previous: Value, timestamp: i64, content: Value) -> LogRecord {
    let msg = json!({
        "key": format!("%msg{offset}"),
        "value": {
            "previous": previous,
            "author": author,
            "sequence": offset + 1,
            "timestamp": timestamp,
            "content": content,
        }
    });
    LogRecord {
        offset,
        value: Some(JsonCodec::new().encode(&msg).unwrap()),
    }
}

fn index(dir: &Path, unboxer: TestUnboxer) -> PrivateIndex<JsonCodec, TestUnboxer> {
    index_with_config(dir, unboxer, PrivateConfig::new())
}

fn index_with_config(
    dir: &Path,
    unboxer: TestUnboxer,
    config: PrivateConfig,
) -> PrivateIndex<JsonCodec, TestUnboxer> {
    let mut index = PrivateIndex::new(dir, JsonCodec::new(), unboxer, config)
        .with_clock(Box::new(ManualClock::new(0)));
    index.load().unwrap();
    index
}

fn decoded(record: &LogRecord) -> Value {
    JsonCodec::new()
        .decode_at(record.value.as_ref().unwrap(), FieldPos::ROOT)
        .unwrap()
}

// =============================================================================
// Streaming classification
// =============================================================================

/// First streaming pass over a three-record log with one openable box2
/// message: plaintext records pass through, the ciphertext decrypts, both
/// offset sets pick up the encrypted offset, and the high-water mark lands
/// on the last scanned record.
#[test]
fn streaming_pass_classifies_and_decrypts() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let secret = json!({"type": "secret", "text": "meet at dawn"});
    let records = [
        record(0, "@alice", Value::Null, 1000, json!({"type": "post"})),
        record(1, "@alice", json!("%msg0"), 2000, json!(box2(&secret))),
        record(2, "@alice", json!("%msg1"), 3000, json!({"type": "vote"})),
    ];

    let out: Vec<LogRecord> = records.iter().map(|r| index.decrypt(r, true)).collect();

    assert_eq!(out[0], records[0]);
    assert_eq!(out[2], records[2]);

    let msg = decoded(&out[1]);
    assert_eq!(msg["value"]["content"], secret);
    assert_eq!(msg["meta"]["private"], json!(true));
    assert_eq!(msg["meta"]["originalContent"], json!(box2(&secret)));

    assert_eq!(index.encrypted().as_slice(), &[1]);
    assert_eq!(index.decryptable().as_slice(), &[1]);
    assert_eq!(index.latest_offset(), 2);
    assert!(index.missing_decrypt().is_empty());
}

/// `reset` empties both sets and pulls the high-water mark back to -1.
#[test]
fn reset_forces_full_reclassification() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let cipher = json!(box2(&json!({"type": "secret"})));
    index.decrypt(&record(0, "@alice", Value::Null, 1000, cipher), true);
    assert_eq!(index.latest_offset(), 0);

    index.reset();

    assert!(index.encrypted().is_empty());
    assert!(index.decryptable().is_empty());
    assert_eq!(index.latest_offset(), -1);
}

/// A box2 record this identity cannot open is still remembered as
/// encrypted, so the missing-decrypt audit can report it.
#[test]
fn unopenable_box2_lands_in_missing_decrypt() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, false));

    let rec = record(0, "@alice", Value::Null, 1000, json!(box2(&json!("x"))));
    let out = index.decrypt(&rec, true);

    assert_eq!(out, rec);
    assert_eq!(index.encrypted().as_slice(), &[0]);
    assert!(index.decryptable().is_empty());
    assert_eq!(index.missing_decrypt(), vec![0]);
}

/// A cached decryptable offset whose key material has since changed can
/// no longer be opened; the cache is advisory, so the record passes
/// through unchanged instead of raising.
#[test]
fn stale_decryptable_entry_degrades_to_unchanged() {
    let dir = tempdir().unwrap();
    let rec = record(
        0,
        "@alice",
        Value::Null,
        1000,
        json!(box2(&json!({"type": "secret"}))),
    );

    {
        let mut index = index(dir.path(), TestUnboxer::new(true, true));
        let out = index.decrypt(&rec, true);
        assert_ne!(out, rec);
        index.persist();
    }

    // Reopen without the key material that produced the cache entry.
    let mut reopened = index(dir.path(), TestUnboxer::new(false, false));
    assert!(reopened.decryptable().contains(0));
    assert_eq!(reopened.decrypt(&rec, true), rec);
}

/// Below the high-water mark, a record absent from the encrypted set is
/// trusted to be plaintext and skipped without reclassification.
#[test]
fn records_below_high_water_are_not_reclassified() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    // Advance the high-water mark past offset 5 with a plaintext record.
    index.decrypt(
        &record(5, "@alice", Value::Null, 1000, json!({"type": "post"})),
        true,
    );
    assert_eq!(index.latest_offset(), 5);

    // A ciphertext at offset 3 streams by again: trusted plaintext.
    let cipher = record(3, "@alice", Value::Null, 1000, json!(box2(&json!("s"))));
    let out = index.decrypt(&cipher, true);

    assert_eq!(out, cipher);
    assert!(index.encrypted().is_empty());
}

/// An erased record and a record with structured (already plain) content
/// both pass through untouched.
#[test]
fn erased_and_structured_content_pass_through() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let erased = LogRecord {
        offset: 0,
        value: None,
    };
    assert_eq!(index.decrypt(&erased, true), erased);

    let plain = record(1, "@alice", Value::Null, 1000, json!({"type": "post"}));
    assert_eq!(index.decrypt(&plain, true), plain);
    assert!(index.encrypted().is_empty());
}

/// A box2 message missing its `previous` pointer cannot supply the
/// required decryption context and stays ciphertext.
#[test]
fn box2_without_previous_is_undecryptable() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let msg = json!({
        "key": "%msg0",
        "value": {
            "author": "@alice",
            "sequence": 1,
            "timestamp": 1000,
            "content": box2(&json!("s")),
        }
    });
    let rec = LogRecord {
        offset: 0,
        value: Some(JsonCodec::new().encode(&msg).unwrap()),
    };

    let out = index.decrypt(&rec, true);
    assert_eq!(out, rec);
    assert_eq!(index.missing_decrypt(), vec![0]);
}

// =============================================================================
// One-off (non-streaming) classification
// =============================================================================

/// Repeated one-off decrypt of the same record yields the same result and
/// never duplicates the offset in the decryptable set.
#[test]
fn one_off_reclassification_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let rec = record(4, "@alice", json!("%msg3"), 1000, json!(box2(&json!("s"))));
    let first = index.decrypt(&rec, false);
    let second = index.decrypt(&rec, false);

    assert_eq!(first, second);
    assert_eq!(index.decryptable().as_slice(), &[4]);
    // One-off calls never advance the streaming high-water mark.
    assert_eq!(index.latest_offset(), -1);
}

/// One-off calls arrive in arbitrary order; the decryptable set stays
/// sorted via ordered insert.
#[test]
fn one_off_out_of_order_inserts_sorted() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    for offset in [9, 4, 7] {
        let rec = record(offset, "@alice", Value::Null, 1000, json!(box2(&json!("s"))));
        index.decrypt(&rec, false);
    }

    assert_eq!(index.decryptable().as_slice(), &[4, 7, 9]);
}

// =============================================================================
// Legacy-form cutover policy
// =============================================================================

/// With a cutover configured, a legacy ciphertext older than the cutover
/// is never decrypted even though the key material would succeed; one at
/// or after the cutover decrypts normally.
#[test]
fn box1_cutover_skips_older_messages() {
    let dir = tempdir().unwrap();
    let cutover = Utc.timestamp_millis_opt(5000).unwrap();
    let config = PrivateConfig {
        decrypt_box1_after: Some(cutover),
        ..PrivateConfig::new()
    };
    let mut index = index_with_config(dir.path(), TestUnboxer::new(true, true), config);

    let secret = json!({"type": "secret"});
    let old = record(0, "@alice", Value::Null, 4999, json!(box1(&secret)));
    let boundary = record(1, "@alice", json!("%msg0"), 5000, json!(box1(&secret)));

    let out_old = index.decrypt(&old, true);
    assert_eq!(out_old, old);

    let out_boundary = index.decrypt(&boundary, true);
    let msg = decoded(&out_boundary);
    assert_eq!(msg["value"]["content"], secret);
}

/// Without a configured cutover, legacy ciphertexts decrypt regardless of
/// their declared timestamp.
#[test]
fn box1_decrypts_without_cutover() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let secret = json!({"type": "secret"});
    let rec = record(0, "@alice", Value::Null, 1, json!(box1(&secret)));
    let out = index.decrypt(&rec, true);

    assert_eq!(decoded(&out)["value"]["content"], secret);
    // Legacy-form offsets are not tracked in the encrypted set.
    assert!(index.encrypted().is_empty());
    assert_eq!(index.decryptable().as_slice(), &[0]);
}

// =============================================================================
// Re-encryption
// =============================================================================

/// A decrypted message leaving the trust boundary gets its ciphertext
/// back and the private marker stripped.
#[test]
fn re_encrypt_round_trips_to_ciphertext() {
    let dir = tempdir().unwrap();
    let mut index = index(dir.path(), TestUnboxer::new(true, true));

    let cipher = box2(&json!({"type": "secret"}));
    let rec = record(0, "@alice", Value::Null, 1000, json!(cipher.clone()));
    let out = index.decrypt(&rec, true);

    let restored = re_encrypt(decoded(&out));
    assert_eq!(restored["value"]["content"], json!(cipher));
    assert!(restored.get("meta").is_none());
}

// =============================================================================
// Persistence
// =============================================================================

/// Offset sets and the high-water mark survive a restart through their
/// snapshot files.
#[test]
fn snapshots_restore_state_across_restart() {
    let dir = tempdir().unwrap();
    let secret = json!({"type": "secret"});

    {
        let mut index = index(dir.path(), TestUnboxer::new(true, true));
        index.decrypt(
            &record(0, "@alice", Value::Null, 1000, json!({"type": "post"})),
            true,
        );
        index.decrypt(
            &record(1, "@alice", json!("%msg0"), 2000, json!(box2(&secret))),
            true,
        );
        // Recognizable as the newer form but not decodable with any key.
        index.decrypt(
            &record(2, "@alice", json!("%msg1"), 3000, json!("?not-base64?.box2")),
            true,
        );
        index.persist();
    }

    let reopened = index(dir.path(), TestUnboxer::new(true, true));
    assert_eq!(reopened.encrypted().as_slice(), &[1, 2]);
    assert_eq!(reopened.decryptable().as_slice(), &[1]);
    assert_eq!(reopened.latest_offset(), 2);
    assert_eq!(reopened.missing_decrypt(), vec![2]);
}

/// Missing snapshot files are a cold start, not an error.
#[test]
fn cold_start_with_no_snapshots() {
    let dir = tempdir().unwrap();
    let index = index(dir.path(), TestUnboxer::new(true, true));

    assert_eq!(index.latest_offset(), -1);
    assert!(index.encrypted().is_empty());
    assert!(index.decryptable().is_empty());
}

/// A corrupted snapshot degrades to a cold start instead of failing load.
#[test]
fn corrupt_snapshot_degrades_to_cold_start() {
    let dir = tempdir().unwrap();

    {
        let mut index = index(dir.path(), TestUnboxer::new(true, true));
        index.decrypt(
            &record(0, "@alice", Value::Null, 1000, json!(box2(&json!("s")))),
            true,
        );
        index.persist();
    }
    std::fs::write(dir.path().join("encrypted.index"), b"garbage!").unwrap();

    let reopened = index(dir.path(), TestUnboxer::new(true, true));
    assert_eq!(reopened.latest_offset(), -1);
    assert!(reopened.encrypted().is_empty());
}

// =============================================================================
// Readiness
// =============================================================================

/// The state-loaded latch waits for the unboxer's own readiness before
/// resolving, and supports multiple waiters.
#[test]
fn state_loaded_waits_for_unboxer_readiness() {
    let dir = tempdir().unwrap();
    let key_material = Arc::new(ReadySignal::new());
    let unboxer = TestUnboxer {
        can_open_box1: true,
        can_open_box2: true,
        ready: Arc::clone(&key_material),
    };
    let mut index = PrivateIndex::new(dir.path(), JsonCodec::new(), unboxer, PrivateConfig::new())
        .with_clock(Box::new(ManualClock::new(0)));
    index.load().unwrap();

    let loaded = index.state_loaded();
    assert!(!loaded.is_ready());

    let fired = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let fired = fired.clone();
        loaded.on_ready(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    key_material.notify();
    assert!(loaded.is_ready());
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}
