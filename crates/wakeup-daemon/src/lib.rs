//! wakeup-daemon library: tokio runtime pieces around `wakeup-core`.
//!
//! Exposed as a library so integration tests and the simulator share them.

pub mod config;
pub mod runtime;

pub use config::GcArgs;
pub use runtime::{connect, pump_until_idle, spawn, SharedSwarm, WatchTimer};
