//! Concurrency primitives shared by the coordination components and workers.
//!
//! [`shutdown`] carries the single cooperative cancellation signal checked by every loop.
//! [`signal`] notifies waiters that some shared state changed so they can re-check it.

pub mod shutdown;
pub mod signal;
