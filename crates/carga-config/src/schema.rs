//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub sampler: RawSamplerConfig,

    #[serde(default)]
    pub tracking: RawTrackingConfig,

    #[serde(default)]
    pub chat: RawChatConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/carga/cargad.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the database
    pub data_dir: Option<PathBuf>,

    /// Capacity of the realtime change feed
    pub event_buffer: Option<usize>,
}

/// Location sampler selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSamplerConfig {
    /// "gpsd" or "none"
    pub kind: Option<String>,

    /// gpsd `host:port`
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTrackingConfig {
    pub one_shot_timeout_seconds: Option<u64>,
    pub watch_timeout_seconds: Option<u64>,
    pub watch_maximum_age_seconds: Option<u64>,
    pub high_accuracy: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChatConfig {
    pub max_message_length: Option<usize>,
}
