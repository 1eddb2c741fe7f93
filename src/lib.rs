//! ripplelog - secondary indexing and private-content decryption for an
//! append-only peer-to-peer log
//!
//! The log itself, the message codec, the persistent key-value store, and
//! the cryptographic unboxing primitives are external collaborators behind
//! trait seams. This crate owns the incremental indexing framework that
//! derives resumable secondary views from the log, and the private content
//! index that classifies and decrypts encrypted records on read.

pub mod clock;
pub mod codec;
pub mod index;
pub mod io;
pub mod kv;
pub mod log;
pub mod observability;
pub mod offsets;
pub mod private;
