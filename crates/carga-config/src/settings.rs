//! Validated settings (the form cargad consumes)

use carga_geo_api::PositionOptions;
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{RawChatConfig, RawConfig, RawSamplerConfig, RawServiceConfig, RawTrackingConfig};

pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_GPSD_ADDRESS: &str = "127.0.0.1:2947";
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub sampler: SamplerConfig,
    pub tracking: TrackingConfig,
    pub chat: ChatConfig,
}

impl Settings {
    /// Convert a raw config. Assumes [`crate::validate_config`] passed.
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            sampler: SamplerConfig::from_raw(raw.sampler),
            tracking: TrackingConfig::from_raw(raw.tracking),
            chat: ChatConfig::from_raw(raw.chat),
        }
    }
}

/// Service paths; `None` falls back to the XDG defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub socket_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub event_buffer: usize,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path,
            data_dir: raw.data_dir,
            event_buffer: raw.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerConfig {
    Gpsd { address: String },
    /// No location provider; every request fails as unsupported
    None,
}

impl SamplerConfig {
    fn from_raw(raw: RawSamplerConfig) -> Self {
        match raw.kind.as_deref() {
            Some("none") => SamplerConfig::None,
            _ => SamplerConfig::Gpsd {
                address: raw
                    .address
                    .unwrap_or_else(|| DEFAULT_GPSD_ADDRESS.to_string()),
            },
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from_raw(RawSamplerConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub one_shot_timeout: Duration,
    pub watch_timeout: Duration,
    pub watch_maximum_age: Duration,
    pub high_accuracy: bool,
}

impl TrackingConfig {
    fn from_raw(raw: RawTrackingConfig) -> Self {
        let one_shot = PositionOptions::one_shot();
        let continuous = PositionOptions::continuous();

        Self {
            one_shot_timeout: raw
                .one_shot_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(one_shot.timeout),
            watch_timeout: raw
                .watch_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(continuous.timeout),
            watch_maximum_age: raw
                .watch_maximum_age_seconds
                .map(Duration::from_secs)
                .unwrap_or(continuous.maximum_age),
            high_accuracy: raw.high_accuracy.unwrap_or(true),
        }
    }

    /// Options for single reads (never served from cache)
    pub fn one_shot_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: self.one_shot_timeout,
            maximum_age: Duration::ZERO,
        }
    }

    pub fn watch_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: self.watch_timeout,
            maximum_age: self.watch_maximum_age,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_raw(RawTrackingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub max_message_length: usize,
}

impl ChatConfig {
    fn from_raw(raw: RawChatConfig) -> Self {
        Self {
            max_message_length: raw.max_message_length.unwrap_or(DEFAULT_MAX_MESSAGE_LENGTH),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_raw(RawChatConfig::default())
    }
}
