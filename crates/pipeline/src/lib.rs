//! Sensor analysis pipeline
//!
//! Bounded sample buffers fed by producers, and a scheduler that re-runs a
//! graph of analysis modules over them after each change. Observers learn
//! about changes through a notification channel the host drains on its own
//! UI thread.

pub mod arena;
pub mod buffer;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod graph;
pub mod queue;
pub mod runtime;
pub mod stage;
pub mod stages;
pub mod storage;
pub mod time;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use arena::*;
pub use buffer::*;
pub use config::*;
pub use control::*;
pub use error::*;
pub use executor::*;
pub use graph::*;
pub use queue::*;
pub use runtime::*;
pub use stage::*;
pub use time::*;
