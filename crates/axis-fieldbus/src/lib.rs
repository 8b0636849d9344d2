//! EtherCAT bus session for a single CiA 402 servo drive.
//!
//! This crate provides:
//! - [`transport`] - the fieldbus primitive contract ([`FieldbusTransport`])
//!   with a simulated backend and an optional SOEM backend
//! - [`session::BusSession`] - bring-up sequencing, PDO buffers, SDO access
//! - [`pdo`] - the packed cyclic process-data layouts
//! - [`al_state`] - EtherCAT application-layer states and status codes

pub mod al_state;
pub mod pdo;
pub mod session;
pub mod sim;
pub mod transport;

#[cfg(all(feature = "soem", target_os = "linux"))]
pub mod soem_backend;

pub use al_state::*;
pub use pdo::*;
pub use session::*;
pub use sim::*;
pub use transport::*;
