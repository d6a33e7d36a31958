//! Location sampler interfaces for cargad
//!
//! This crate defines the boundary between the tracking controller and
//! whatever produces position fixes on the device. It contains no device
//! code itself, only the trait, its value types and test doubles.

mod handle;
mod mock;
mod traits;
mod unsupported;

pub use handle::*;
pub use mock::*;
pub use traits::*;
pub use unsupported::*;
