//! Type definitions for wire messages.

mod prompt;
mod workflow;

pub use prompt::*;
pub use workflow::*;
