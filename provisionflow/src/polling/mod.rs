//! Readiness polling.
//!
//! One parameterized poller replaces every hand-written retry loop: fixed
//! interval, bounded attempts, transient errors treated as not-ready,
//! permanent errors aborting at once, and sleeps that yield to cancellation.

mod config;
mod poller;

pub use config::{PollConfig, PollSpec};
#[cfg(test)]
pub use poller::MockSleeper;
pub use poller::{Poller, ProbeResult, Sleeper, TokioSleeper};
