//! Shared utilities for carga
//!
//! This crate provides:
//! - ID types (ShipmentId, UserId, ClientId)
//! - Wall-clock helpers with a debug-only mock clock
//! - Error types
//! - Rate limiting helpers
//! - Default paths for socket and data directories

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
