//! Convoy Core - Core types shared by discovery and the approval engine

pub mod config;
pub mod error;
pub mod message;
pub mod types;

pub use config::*;
pub use error::*;
pub use message::*;
pub use types::*;
