//! The process group that an all-pairs sweep runs in.
//!
//! The orchestrator only sees the group through [`ProcessGroup`]. [`LocalGroup`] is the provided
//! runtime, running every group member as an OS thread with its own [`Endpoint`].

mod abstractions;
mod barrier;
mod endpoint;
mod local;

pub use abstractions::*;
pub(crate) use barrier::*;
pub use endpoint::*;
pub use local::*;
