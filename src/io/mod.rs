//! Low-level file I/O helpers

pub mod atomic;
