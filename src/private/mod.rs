//! Private content index
//!
//! Classifies every log record as plaintext, encrypted-but-openable, or
//! encrypted-and-not-ours, and exposes the decrypt-on-read operation every
//! reader of the log goes through. Only *capability* is cached (the
//! offsets of records this identity can open), never plaintext itself;
//! decryption is recomputed on every read. Two sorted offset sets back the
//! cache and are persisted as compressed snapshots, saved through a
//! debounce gate because they churn rapidly during catch-up.

mod errors;
mod message;
mod unbox;

pub use errors::{PrivateError, PrivateResult};
pub use message::{re_encrypt, reconstruct_message};
pub use unbox::{ReadySignal, Unboxer};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{Clock, Debounce, SystemClock};
use crate::codec::{EncodedType, FieldPos, MessageCodec};
use crate::log::LogRecord;
use crate::observability::{log_event, Event};
use crate::offsets::{load_snapshot, save_snapshot, SnapshotError, SortedOffsetSet};

const ENCRYPTED_FILE: &str = "encrypted.index";
const DECRYPTABLE_FILE: &str = "candecrypt.index";

/// Configuration surface of the private index.
#[derive(Debug, Clone, Default)]
pub struct PrivateConfig {
    /// Messages declaring a timestamp strictly before this instant are
    /// never decrypted with the legacy envelope form.
    pub decrypt_box1_after: Option<DateTime<Utc>>,
    /// Snapshot saves coalesce into at most one write per this window.
    /// Zero means save on every request.
    pub save_window_millis: u64,
}

impl PrivateConfig {
    /// Defaults: no legacy cutover, one save per second at most.
    pub fn new() -> Self {
        Self {
            decrypt_box1_after: None,
            save_window_millis: 1000,
        }
    }
}

/// Decrypt-on-read index over the log.
pub struct PrivateIndex<C, U> {
    codec: C,
    unboxer: U,
    config: PrivateConfig,
    clock: Box<dyn Clock>,
    encrypted_path: PathBuf,
    decryptable_path: PathBuf,
    /// Offsets whose content was recognized as newer-form ciphertext.
    encrypted: SortedOffsetSet,
    /// Offsets this identity has successfully unboxed at least once.
    decryptable: SortedOffsetSet,
    /// High-water offset the sets are authoritative up to.
    latest_offset: i64,
    save_gate: Debounce,
    state_loaded: Arc<ReadySignal>,
}

impl<C: MessageCodec, U: Unboxer> PrivateIndex<C, U> {
    /// Create an index persisting under `dir`. Call [`load`] before use.
    ///
    /// [`load`]: PrivateIndex::load
    pub fn new(dir: &Path, codec: C, unboxer: U, config: PrivateConfig) -> Self {
        let save_gate = Debounce::new(config.save_window_millis);
        Self {
            codec,
            unboxer,
            config,
            clock: Box::new(SystemClock),
            encrypted_path: dir.join(ENCRYPTED_FILE),
            decryptable_path: dir.join(DECRYPTABLE_FILE),
            encrypted: SortedOffsetSet::new(),
            decryptable: SortedOffsetSet::new(),
            latest_offset: -1,
            save_gate,
            state_loaded: Arc::new(ReadySignal::new()),
        }
    }

    /// Replace the clock, for deterministic tests.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load persisted offset sets.
    ///
    /// A missing, empty, or corrupt snapshot is a cold start: both sets
    /// empty and the high-water offset reset to `-1`, forcing full
    /// reclassification on the next scan. Only real I/O faults surface.
    pub fn load(&mut self) -> PrivateResult<()> {
        let encrypted = Self::load_set(&self.encrypted_path)?;
        match encrypted {
            None => {
                // Without the encrypted set the decryptable snapshot has
                // no authoritative boundary; start cold.
                self.latest_offset = -1;
            }
            Some((offset, set)) => {
                self.encrypted = set;
                let decryptable_offset = match Self::load_set(&self.decryptable_path)? {
                    Some((offset, set)) => {
                        self.decryptable = set;
                        offset
                    }
                    None => -1,
                };
                self.latest_offset = offset.min(decryptable_offset);
            }
        }

        let loaded = Arc::clone(&self.state_loaded);
        self.unboxer.ready().on_ready(move || loaded.notify());

        log_event(
            Event::PrivateStateLoaded,
            &[
                ("encrypted", &self.encrypted.len().to_string()),
                ("decryptable", &self.decryptable.len().to_string()),
                ("offset", &self.latest_offset.to_string()),
            ],
        );
        Ok(())
    }

    fn load_set(path: &Path) -> PrivateResult<Option<(i64, SortedOffsetSet)>> {
        let file = path.display().to_string();
        match load_snapshot(path) {
            Ok(Some(snapshot)) => Ok(Some((snapshot.high_water, snapshot.set))),
            Ok(None) => Ok(None),
            Err(corrupt @ SnapshotError::Corrupt { .. }) => {
                log_event(
                    Event::PrivateStateLoaded,
                    &[("cold_start", "corrupt_snapshot"), ("detail", &corrupt.to_string())],
                );
                Ok(None)
            }
            Err(io) => Err(PrivateError::load(&file, io)),
        }
    }

    /// Latch resolved once persisted state is loaded and the unboxer is
    /// ready for newer-form decryption.
    pub fn state_loaded(&self) -> Arc<ReadySignal> {
        Arc::clone(&self.state_loaded)
    }

    /// High-water offset the offset sets are authoritative up to.
    pub fn latest_offset(&self) -> i64 {
        self.latest_offset
    }

    /// Offsets recognized as newer-form ciphertext.
    pub fn encrypted(&self) -> &SortedOffsetSet {
        &self.encrypted
    }

    /// Offsets this identity can open.
    pub fn decryptable(&self) -> &SortedOffsetSet {
        &self.decryptable
    }

    /// Produce the record with cleartext substituted, or the unchanged
    /// record when it is not encrypted or cannot be opened.
    ///
    /// `streaming` means the caller is scanning the log in offset order
    /// (catch-up or live); classification state advances and new offsets
    /// append to the sets. A non-streaming call is a one-off lookup in
    /// arbitrary order: it never advances the high-water offset and
    /// inserts at the correct sorted position instead of appending.
    pub fn decrypt(&mut self, record: &LogRecord, streaming: bool) -> LogRecord {
        let Some(buf) = record.value.as_ref() else {
            return record.clone();
        };
        let offset = record.offset;

        if self.decryptable.contains(offset) {
            // Known-openable: unconditionally attempt. The cache is
            // advisory, so an unexpected failure degrades to the
            // unchanged record instead of raising.
            let Some((ciphertext, value_pos)) = self.content_string(buf) else {
                return record.clone();
            };
            match self.try_decrypt_content(&ciphertext, buf, value_pos) {
                Some(content) => reconstruct_message(&self.codec, record, content)
                    .unwrap_or_else(|| record.clone()),
                None => record.clone(),
            }
        } else if offset as i64 > self.latest_offset || !streaming {
            if streaming {
                self.latest_offset = offset as i64;
            }

            let Some(value_pos) = self.codec.seek_field(buf, FieldPos::ROOT, "value") else {
                return record.clone();
            };
            let Some(content_pos) = self.codec.seek_field(buf, value_pos, "content") else {
                return record.clone();
            };
            // Ciphertexts are always string-encoded; anything else is
            // already-plain structured content.
            if !matches!(
                self.codec.encoded_type(buf, content_pos),
                Ok(EncodedType::String)
            ) {
                return record.clone();
            }
            let Ok(Value::String(ciphertext)) = self.codec.decode_at(buf, content_pos) else {
                return record.clone();
            };

            if ciphertext.ends_with(".box") && self.before_box1_cutover(buf, value_pos) {
                return record.clone();
            }
            if streaming && ciphertext.ends_with(".box2") {
                self.encrypted.push(offset);
                self.schedule_save();
            }

            let Some(content) = self.try_decrypt_content(&ciphertext, buf, value_pos) else {
                return record.clone();
            };

            if streaming {
                self.decryptable.push(offset);
            } else {
                self.decryptable.insert(offset);
            }
            self.schedule_save();

            reconstruct_message(&self.codec, record, content).unwrap_or_else(|| record.clone())
        } else {
            // Below the high-water mark and absent from the encrypted
            // set: trusted plaintext, no re-scan.
            record.clone()
        }
    }

    /// Offsets seen encrypted that this identity cannot currently open.
    pub fn missing_decrypt(&self) -> Vec<u64> {
        self.encrypted.difference(&self.decryptable)
    }

    /// Drop all decrypt state, forcing full reclassification on the next
    /// scan. Used when key material changes or corruption is suspected.
    pub fn reset(&mut self) {
        self.encrypted.clear();
        self.decryptable.clear();
        self.latest_offset = -1;
        log_event(Event::PrivateReset, &[]);
        self.schedule_save();
    }

    /// Request a snapshot save through the debounce gate.
    pub fn schedule_save(&mut self) {
        let now = self.clock.now_millis();
        if self.save_gate.request(now) {
            self.save_now();
        }
    }

    /// Drain any absorbed save request. Call at shutdown.
    pub fn persist(&mut self) {
        if self.save_gate.take_pending() {
            self.save_now();
        }
    }

    fn save_now(&self) {
        for (path, set) in [
            (&self.encrypted_path, &self.encrypted),
            (&self.decryptable_path, &self.decryptable),
        ] {
            if let Err(e) = save_snapshot(path, self.latest_offset, set) {
                log_event(
                    Event::PrivateSaveFailed,
                    &[("file", &path.display().to_string()), ("error", &e.to_string())],
                );
            }
        }
        log_event(
            Event::PrivateStateSaved,
            &[("offset", &self.latest_offset.to_string())],
        );
    }

    /// Locate and decode the content string, returning it with the
    /// position of the enclosing `value` object for nested lookups.
    fn content_string(&self, buf: &[u8]) -> Option<(String, FieldPos)> {
        let value_pos = self.codec.seek_field(buf, FieldPos::ROOT, "value")?;
        let content_pos = self.codec.seek_field(buf, value_pos, "content")?;
        match self.codec.decode_at(buf, content_pos) {
            Ok(Value::String(ciphertext)) => Some((ciphertext, value_pos)),
            _ => None,
        }
    }

    /// Legacy-form cutover policy: skip decryption when the message's
    /// declared timestamp predates the configured instant.
    fn before_box1_cutover(&self, buf: &[u8], value_pos: FieldPos) -> bool {
        let Some(cutover) = self.config.decrypt_box1_after else {
            return false;
        };
        let declared = self
            .codec
            .seek_field(buf, value_pos, "timestamp")
            .and_then(|pos| self.codec.decode_at(buf, pos).ok())
            .and_then(|v| v.as_f64());
        match declared {
            Some(millis) => millis < cutover.timestamp_millis() as f64,
            // No declared timestamp: the policy cannot apply.
            None => false,
        }
    }

    fn try_decrypt_content(
        &self,
        ciphertext: &str,
        buf: &[u8],
        value_pos: FieldPos,
    ) -> Option<Value> {
        if ciphertext.ends_with(".box") {
            self.unboxer.unbox_box1(ciphertext)
        } else if ciphertext.ends_with(".box2") {
            let author_pos = match self.codec.seek_field(buf, value_pos, "author") {
                Some(pos) => pos,
                None => {
                    log_event(Event::PrivateMissingField, &[("field", "author")]);
                    return None;
                }
            };
            let author = self.codec.decode_at(buf, author_pos).ok()?;
            let previous_pos = match self.codec.seek_field(buf, value_pos, "previous") {
                Some(pos) => pos,
                None => {
                    log_event(Event::PrivateMissingField, &[("field", "previous")]);
                    return None;
                }
            };
            let previous = self.codec.decode_at(buf, previous_pos).ok()?;
            self.unboxer.unbox_box2(ciphertext, &author, &previous)
        } else {
            None
        }
    }
}
