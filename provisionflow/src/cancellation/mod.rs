//! Structured cancellation utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative, externally raised aborts
//! - CancelScope combining a token with a run deadline

mod scope;
mod token;

pub use scope::{CancelScope, DEADLINE_EXCEEDED};
pub use token::CancellationToken;
