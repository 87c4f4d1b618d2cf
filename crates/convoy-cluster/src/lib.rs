//! Convoy Cluster - Peer discovery and membership
//!
//! - `discovery`: the peer set and its probing loop
//! - `node`: a single peer, its TCP liveness probe and metadata exchange
//! - `failure`: reachability classification for reporting
//! - `wire`: `/discovery` request and response bodies
//! - `http`: the `/discovery` endpoint served to other peers

pub mod discovery;
pub mod failure;
pub mod http;
pub mod node;
pub mod wire;

pub use discovery::*;
pub use failure::*;
pub use http::*;
pub use node::*;
pub use wire::*;
