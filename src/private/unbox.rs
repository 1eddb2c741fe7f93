//! Cryptographic unboxing seam
//!
//! The actual cryptography lives outside this crate. Two envelope forms
//! exist: the legacy form needs only this identity's key material, the
//! newer form additionally authenticates the message's author and its
//! `previous`-message pointer. Key material for the newer form may load
//! asynchronously, so the unboxer exposes a one-shot readiness latch that
//! consumers await before asking for newer-form decryption.

use std::sync::Mutex;

use serde_json::Value;

/// One-shot readiness latch supporting multiple independent waiters.
///
/// Continuations registered before `notify` run exactly once when it
/// fires; continuations registered after run immediately.
#[derive(Default)]
pub struct ReadySignal {
    inner: Mutex<ReadyInner>,
}

#[derive(Default)]
struct ReadyInner {
    ready: bool,
    waiters: Vec<Box<dyn FnOnce() + Send>>,
}

impl ReadySignal {
    /// Create an unresolved latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a latch that is already resolved.
    pub fn resolved() -> Self {
        let signal = Self::new();
        signal.notify();
        signal
    }

    /// Whether the latch has fired.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().expect("ready signal lock poisoned").ready
    }

    /// Fire the latch, running queued waiters. Later calls are no-ops.
    pub fn notify(&self) {
        let waiters = {
            let mut inner = self.inner.lock().expect("ready signal lock poisoned");
            if inner.ready {
                return;
            }
            inner.ready = true;
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            waiter();
        }
    }

    /// Run `f` once the latch fires (immediately when already resolved).
    pub fn on_ready(&self, f: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut inner = self.inner.lock().expect("ready signal lock poisoned");
            if inner.ready {
                true
            } else {
                inner.waiters.push(Box::new(f));
                return;
            }
        };
        if run_now {
            f();
        }
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Decryption primitives for both envelope forms.
///
/// Every method returns the cleartext content on success and `None` when
/// the ciphertext cannot be opened with this identity's keys, a frequent
/// and expected outcome rather than an error.
pub trait Unboxer {
    /// Open a legacy-form envelope with this identity's key material.
    fn unbox_box1(&self, ciphertext: &str) -> Option<Value>;

    /// Open a newer-form envelope. `author` and `previous` are the
    /// additional authenticated context from the enclosing message.
    fn unbox_box2(&self, ciphertext: &str, author: &Value, previous: &Value) -> Option<Value>;

    /// Latch consumers await before requesting newer-form decryption.
    fn ready(&self) -> &ReadySignal;
}
