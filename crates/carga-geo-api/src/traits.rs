//! Location sampler traits

use async_trait::async_trait;
use carga_api::TrackingSample;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::WatchHandle;

/// Errors from location sampling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplerError {
    /// No location provider exists on this host
    #[error("Location is not supported in this environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Timed out waiting for a position fix")]
    Timeout,
}

pub type SamplerResult<T> = Result<T, SamplerError>;

/// Options for a position request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    /// Maximum wait for a single fix
    pub timeout: Duration,
    /// A cached fix younger than this may be returned. Zero disables the cache.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Preset for a single read: 10 s timeout, no cache
    pub fn one_shot() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }

    /// Preset for a continuous watch: 15 s per fix, 30 s max age
    pub fn continuous() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(15),
            maximum_age: Duration::from_secs(30),
        }
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::one_shot()
    }
}

/// Delivered on a watch's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Sample(TrackingSample),
    /// Non-fatal sensor failure; the watch stays open
    Error(SamplerError),
}

/// An open continuous watch
#[derive(Debug)]
pub struct Watch {
    pub handle: WatchHandle,
    /// Closed by the sampler once the handle is released
    pub events: mpsc::UnboundedReceiver<WatchEvent>,
}

/// Location sampler trait, implemented by device-specific adapters
#[async_trait]
pub trait LocationSampler: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Read a single fix. Nothing is persisted.
    async fn current_location(&self, options: PositionOptions) -> SamplerResult<TrackingSample>;

    /// Start delivering fixes until the handle is released
    async fn watch(&self, options: PositionOptions) -> SamplerResult<Watch>;

    /// Release a watch. Unknown or already released handles are ignored.
    fn unwatch(&self, handle: &WatchHandle);

    /// Optional: check if the sampler is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
