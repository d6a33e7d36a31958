//! Watch handle abstraction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a continuous watch.
///
/// Created by the sampler in `watch` and released with `unwatch`. The
/// controller never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchHandle {
    id: u64,
    backend: WatchBackend,
}

impl WatchHandle {
    pub fn new(id: u64, backend: WatchBackend) -> Self {
        Self { id, backend }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> WatchBackend {
        self.backend
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.backend.as_str(), self.id)
    }
}

/// Which sampler issued a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    Gpsd,
    Mock,
}

impl WatchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchBackend::Gpsd => "gpsd",
            WatchBackend::Mock => "mock",
        }
    }
}
