//! Render device configuration.
//!
//! Loaded from TOML (every key optional) or built in code:
//!
//! ```toml
//! draw_threads = 8
//! compute_threads = 1
//! transfer_threads = 1
//! staging_flush_threshold = 250
//! fence_timeout_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Number of draw recording lanes.
pub const DEFAULT_DRAW_THREADS: usize = 8;
/// Number of compute recording lanes.
pub const DEFAULT_COMPUTE_THREADS: usize = 1;
/// Number of transfer recording lanes.
pub const DEFAULT_TRANSFER_THREADS: usize = 1;
/// Staged commands per lane before they are pushed to the worker.
pub const DEFAULT_STAGING_FLUSH_THRESHOLD: usize = 250;
/// Largest inline buffer update recorded in one command.
pub const DEFAULT_UPDATE_CHUNK_SIZE: usize = 65536;

/// Tunables for a [`RenderDevice`](crate::RenderDevice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Recording lanes for secondary draw command buffers.
    pub draw_threads: usize,
    pub compute_threads: usize,
    pub transfer_threads: usize,
    /// Commands staged per lane before a bulk push; `0` disables staging.
    pub staging_flush_threshold: usize,
    /// Upper bound for waiting on the per-queue frame fences.
    pub fence_timeout_ms: u64,
    /// Chunk size for deferred buffer updates, in bytes.
    pub update_chunk_size: usize,
    /// Viewport and scissor slots tracked per pass.
    pub max_viewports: usize,
    /// Prefix for recording worker thread names.
    pub worker_name_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            draw_threads: DEFAULT_DRAW_THREADS,
            compute_threads: DEFAULT_COMPUTE_THREADS,
            transfer_threads: DEFAULT_TRANSFER_THREADS,
            staging_flush_threshold: DEFAULT_STAGING_FLUSH_THRESHOLD,
            fence_timeout_ms: 5000,
            update_chunk_size: DEFAULT_UPDATE_CHUNK_SIZE,
            max_viewports: 16,
            worker_name_prefix: "lilium".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draw_threads(mut self, count: usize) -> Self {
        self.draw_threads = count;
        self
    }

    pub fn with_compute_threads(mut self, count: usize) -> Self {
        self.compute_threads = count;
        self
    }

    pub fn with_transfer_threads(mut self, count: usize) -> Self {
        self.transfer_threads = count;
        self
    }

    pub fn with_staging_flush_threshold(mut self, threshold: usize) -> Self {
        self.staging_flush_threshold = threshold;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_update_chunk_size(mut self, bytes: usize) -> Self {
        self.update_chunk_size = bytes;
        self
    }

    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, DeviceError> {
        let config: Self = toml::from_str(text).map_err(|e| DeviceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DeviceError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded device config from {}: {} draw / {} compute / {} transfer lanes",
            path.display(),
            config.draw_threads,
            config.compute_threads,
            config.transfer_threads
        );
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, DeviceError> {
        toml::to_string(self).map_err(|e| DeviceError::Config(e.to_string()))
    }

    /// Check that every lane count and size is usable.
    pub fn validate(&self) -> Result<(), DeviceError> {
        let lanes = [
            ("draw_threads", self.draw_threads),
            ("compute_threads", self.compute_threads),
            ("transfer_threads", self.transfer_threads),
        ];
        for (name, count) in lanes {
            if count == 0 {
                return Err(DeviceError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.update_chunk_size == 0 || self.update_chunk_size % 4 != 0 {
            return Err(DeviceError::Config(format!(
                "update_chunk_size must be a non-zero multiple of 4, got {}",
                self.update_chunk_size
            )));
        }
        if self.max_viewports == 0 {
            return Err(DeviceError::Config(
                "max_viewports must be at least 1".to_string(),
            ));
        }
        if self.fence_timeout_ms == 0 {
            return Err(DeviceError::Config(
                "fence_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
