//! Core tracking logic for cargad
//!
//! This crate is the heart of cargad, containing:
//! - The process-wide session registry (at most one watch per shipment)
//! - The tracking controller (start, stop, per-sample persistence)
//! - Route distance (haversine)
//! - Shipment chat

mod chat;
mod controller;
mod geo;
mod registry;

pub use chat::*;
pub use controller::*;
pub use geo::*;
pub use registry::*;
