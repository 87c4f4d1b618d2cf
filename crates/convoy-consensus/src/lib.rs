//! Convoy Consensus - Approval-gated task execution
//!
//! - `request`: one task proposal, its votes, callbacks and state machine
//! - `engine`: registry creating, indexing and retiring requests
//! - `dispatch`: the seam through which approved tasks reach clients
//! - `outbox`: pull-model dispatcher clients poll and acknowledge
//! - `check`: externally triggered checks driven through the engine

pub mod catalog;
pub mod check;
pub mod dispatch;
pub mod engine;
pub mod outbox;
pub mod request;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::*;
pub use check::*;
pub use dispatch::*;
pub use engine::ConsensusEngine;
pub use outbox::*;
pub use request::{Callback, ConsensusRequest};
pub use state::*;
