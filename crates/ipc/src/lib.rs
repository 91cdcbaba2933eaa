//! Wire protocol for Easel
//!
//! Defines the node graph, workflow parameters, submission envelope and
//! event-channel frames exchanged with a ComfyUI-style diffusion server.

mod error;
pub mod graph;
pub mod messages;
pub mod types;

pub use error::IpcError;
pub use graph::{InputValue, Link, Node, NodeGraph, NodeId};
pub use messages::ServerMessage;
pub use types::*;
