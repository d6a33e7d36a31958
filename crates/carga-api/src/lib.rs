//! Protocol types for cargad IPC
//!
//! This crate defines the stable API between cargad and its clients
//! (transporter and client tracking views):
//! - Commands (requests from clients)
//! - Responses
//! - Realtime events, scoped to channels
//! - Shared records: samples, tracking rows, summaries, chat, profiles

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
