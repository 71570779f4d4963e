//! Purpose: Crash-safe FIFO byte queue stored in a single random-access file.
//! Exports: `api` (stable surface) and `core` (storage layout, planning, errors).
//! Role: Library backing the `queuefile` CLI and any embedding application.
//! Invariants: Every mutation becomes visible through exactly one header write.
//! Invariants: The queue has one owner; callers synchronize access themselves.
pub mod api;
pub mod core;

pub use api::{Error, ErrorKind, QueueFile, QueueOptions};
