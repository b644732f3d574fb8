//! # Lilium Device
//!
//! Multi-threaded command recording and deferred GPU resource scheduling.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RenderDevice`] - Owns the recording lanes and the main command buffers,
//!   drives the frame lifecycle and is the only submitter to the queues
//! - [`CommandWorker`] / [`ThreadCluster`] - One OS thread per recording lane,
//!   translating [`Command`]s into [`GpuApi`] calls
//! - [`Scheduler`] - Holds [`DeferredCommand`]s until their [`CommandPass`]
//!   and, for resource releases, the fence gating them come up
//! - [`GpuApi`] - The driver abstraction, with a recording [`DummyBackend`]
//!   and an `ash` backend behind the `vulkan-backend` feature
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lilium_device::{DeviceConfig, DummyBackend, PrimitiveGroup, RenderDevice};
//!
//! let api = Arc::new(DummyBackend::auto_retire());
//! let mut device = RenderDevice::open(api, DeviceConfig::default())?;
//!
//! device.begin_frame(0)?;
//! device.begin_pass(pass_info)?;
//! device.set_graphics_pipeline(pipeline, layout)?;
//! device.build_render_pipeline()?;
//! device.draw(&PrimitiveGroup::vertices(36))?;
//! device.end_pass()?;
//! device.push_free_buffer(QueueType::Graphics, old_buffer, Some(old_memory));
//! device.end_frame()?;
//!
//! device.close()?;
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod deferred;
pub mod device;
pub mod error;
pub mod scheduler;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuApi};
pub use command::{Command, CommandKind, DrawArgs, IndirectArgs};
pub use config::DeviceConfig;
pub use deferred::{DeferredCommand, DeferredKind, DelegateTarget, FollowUps, RecordContext};
pub use device::{CommandState, FrameState, FrameStats, PipelineInfoBits, RenderDevice};
pub use error::{DeviceError, DeviceResult};
pub use scheduler::{CommandPass, Scheduler};
pub use types::*;
pub use worker::{CommandWorker, CompletionEvent, Recorder, ThreadCluster};

/// Device library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
