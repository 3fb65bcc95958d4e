//! Embedded TURN relay for chuan
//!
//! Wraps the `turn` crate behind a small state machine so callers only
//! ever see stopped/running, a config-bound authentication hook, and
//! the counters and client descriptor the HTTP surface publishes.

#![forbid(unsafe_code)]

pub mod service;
pub mod stats;

pub use service::{TurnConfig, TurnDescriptor, TurnError, TurnService, TurnState};
pub use stats::{TurnStats, TurnStatsSnapshot};
