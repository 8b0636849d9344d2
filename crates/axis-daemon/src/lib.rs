//! Supervisor-side plumbing shared by the servo-axis command-line
//! programs: signal handling, transport selection, argument parsing
//! helpers and the non-realtime supervision loop.

pub mod cli;
pub mod signals;
pub mod supervisor;

pub use cli::*;
pub use signals::*;
pub use supervisor::*;
