//! Observability for the indexing layer
//!
//! Structured JSON logging with typed lifecycle events. One log line per
//! event, deterministic key ordering, synchronous writes, no background
//! threads. Logging never affects indexing behavior; a decrypt that fails
//! or a snapshot that cannot be saved is logged and the caller degrades
//! gracefully.

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log a lifecycle event with fields at its default severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
