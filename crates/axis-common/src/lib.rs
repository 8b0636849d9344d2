#![doc = "Common types shared across the servo-axis workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod shared;
pub mod units;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use shared::*;
pub use units::*;
