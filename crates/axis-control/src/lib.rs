//! Drive power state machine, trajectory generation and the cyclic loop.
//!
//! - [`cia402`] - status-word classification and control-word issuance
//! - [`trajectory`] - trapezoidal profile generator
//! - [`cycle`] - the 2 ms realtime loop tying bus, drive and trajectory
//!   together
//! - [`timing`] - absolute-deadline monotonic sleeper
//! - [`realtime`] - scheduler policy, memory locking and CPU affinity

pub mod cia402;
pub mod cycle;
pub mod realtime;
pub mod timing;
pub mod trajectory;

pub use cia402::*;
pub use cycle::*;
pub use realtime::*;
pub use timing::*;
pub use trajectory::*;
