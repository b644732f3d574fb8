//! Device error types.

use thiserror::Error;

/// Errors produced by the render device, its recording workers and the
/// deferred command scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The GPU device was lost. Sticky: every later call fails the same way.
    #[error("GPU device lost")]
    DeviceLost,
    /// The driver ran out of host or device memory.
    #[error("out of memory")]
    OutOfMemory,
    /// A handle was null, stale or already destroyed.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: String },
    /// An API contract was broken by the caller.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// An operation was called in the wrong device state.
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// A fence wait did not complete within the configured timeout.
    #[error("fence wait timed out after {timeout_ms} ms")]
    FenceTimeout { timeout_ms: u64 },
    /// A graphics API call failed.
    #[error("{call} failed: {reason}")]
    ApiCall { call: &'static str, reason: String },
    /// A recording lane failed while translating its commands.
    #[error("command lane {lane} failed: {source}")]
    LaneFailed {
        lane: usize,
        #[source]
        source: Box<DeviceError>,
    },
    /// The current frame hit an error and must be ended before recording resumes.
    #[error("frame aborted: {reason}")]
    FrameAborted { reason: String },
    /// A recording worker thread panicked.
    #[error("command worker '{name}' panicked")]
    WorkerPanicked { name: String },
    /// The device configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DeviceError {
    /// Create a contract violation error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }

    /// Create an API call failure.
    pub fn api(call: &'static str, reason: impl Into<String>) -> Self {
        Self::ApiCall {
            call,
            reason: reason.into(),
        }
    }

    /// Create an invalid handle error.
    pub fn invalid_handle(kind: &'static str, handle: impl std::fmt::Display) -> Self {
        Self::InvalidHandle {
            kind,
            handle: handle.to_string(),
        }
    }

    /// Whether this error (or the lane failure it wraps) means the device is gone.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::DeviceLost => true,
            Self::LaneFailed { source, .. } => source.is_device_lost(),
            _ => false,
        }
    }
}

/// Result alias used throughout the device crate.
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(DeviceError::DeviceLost.to_string(), "GPU device lost");

        let err = DeviceError::api("vkQueueSubmit", "ERROR_OUT_OF_DATE");
        assert_eq!(err.to_string(), "vkQueueSubmit failed: ERROR_OUT_OF_DATE");

        let err = DeviceError::InvalidState {
            expected: "in frame",
            actual: "idle",
        };
        assert_eq!(err.to_string(), "invalid state: expected in frame, found idle");
    }

    #[test]
    fn test_device_lost_through_lane() {
        let err = DeviceError::LaneFailed {
            lane: 3,
            source: Box::new(DeviceError::DeviceLost),
        };
        assert!(err.is_device_lost());
        assert!(!DeviceError::OutOfMemory.is_device_lost());
        assert_eq!(err.to_string(), "command lane 3 failed: GPU device lost");
    }
}
