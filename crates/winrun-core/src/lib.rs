//! Shared foundations for the WinRun host core.
//!
//! Holds the [`env::Environment`] abstraction (time, randomness, sleep) that
//! keeps timer-driven components deterministic under test, and the pure
//! [`backoff::BackoffPolicy`] used by window-stream reconnects.

pub mod backoff;
pub mod env;

pub use backoff::BackoffPolicy;
pub use env::{Environment, SystemEnv};
