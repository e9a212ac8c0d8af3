//! Replay of recorded sequences.

pub mod executor;

pub use executor::{ReplayError, ReplayExecutor, ReplayReport};
