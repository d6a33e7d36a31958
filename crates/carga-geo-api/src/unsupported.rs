//! Sampler for hosts without a location provider

use async_trait::async_trait;
use carga_api::TrackingSample;

use crate::{LocationSampler, PositionOptions, SamplerError, SamplerResult, Watch, WatchHandle};

/// Fails every request with `UnsupportedEnvironment`
#[derive(Debug, Default)]
pub struct UnsupportedSampler;

impl UnsupportedSampler {
    fn error() -> SamplerError {
        SamplerError::UnsupportedEnvironment("no location provider configured".into())
    }
}

#[async_trait]
impl LocationSampler for UnsupportedSampler {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn current_location(&self, _options: PositionOptions) -> SamplerResult<TrackingSample> {
        Err(Self::error())
    }

    async fn watch(&self, _options: PositionOptions) -> SamplerResult<Watch> {
        Err(Self::error())
    }

    fn unwatch(&self, _handle: &WatchHandle) {}

    fn is_healthy(&self) -> bool {
        false
    }
}
