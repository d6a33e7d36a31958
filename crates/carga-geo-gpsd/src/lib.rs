//! gpsd location sampler for cargad
//!
//! Provides:
//! - A client for the gpsd JSON protocol (`?WATCH` + `TPV` reports)
//! - One-shot reads with a short-lived fix cache
//! - Continuous watches that survive gpsd restarts

mod adapter;
mod protocol;

pub use adapter::*;
pub use protocol::*;
