//! Error types for carga

use thiserror::Error;

/// Cross-crate error type for carga operations
#[derive(Debug, Error)]
pub enum CargaError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl CargaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CargaError>;
