//! Shared setup for the render device integration tests.
//!
//! Every test drives a [`RenderDevice`] over a [`DummyBackend`] and inspects
//! the backend's call log afterwards.

#![allow(dead_code)]

use std::sync::Arc;

use lilium_core::RawHandle;
use lilium_device::backend::dummy::{ApiCall, DummyBackend};
use lilium_device::{
    CommandBuffer, CommandBufferLevel, DeviceConfig, Framebuffer, PassInfo, Pipeline,
    PipelineLayout, QueueType, Rect2D, RenderDevice, RenderPass,
};

pub const DRAW_LANES: usize = 4;
pub const STAGING_THRESHOLD: usize = 4;

/// Initialize logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small configuration that keeps thread counts low.
pub fn test_config() -> DeviceConfig {
    DeviceConfig::new()
        .with_draw_threads(DRAW_LANES)
        .with_compute_threads(2)
        .with_transfer_threads(1)
        .with_staging_flush_threshold(STAGING_THRESHOLD)
        .with_fence_timeout(std::time::Duration::from_millis(500))
        .with_worker_name_prefix("test")
}

/// A device over a backend whose fences only signal when waited on.
pub struct TestContext {
    pub api: Arc<DummyBackend>,
    pub device: RenderDevice,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_backend(DummyBackend::new(), test_config())
    }

    /// Fences signal as soon as they are submitted.
    pub fn auto_retire() -> Self {
        Self::with_backend(DummyBackend::auto_retire(), test_config())
    }

    pub fn with_backend(backend: DummyBackend, config: DeviceConfig) -> Self {
        init_logging();
        let api = Arc::new(backend);
        let device = RenderDevice::open(api.clone(), config).expect("device opens");
        Self { api, device }
    }

    /// A pipeline the backend knows about, with an arbitrary layout.
    pub fn pipeline(&self) -> (Pipeline, PipelineLayout) {
        (self.api.create_pipeline(), layout(7))
    }

    /// Bind a fresh pipeline on the next draw lane.
    pub fn bind_pipeline(&mut self) {
        let (pipeline, layout) = self.pipeline();
        self.device
            .set_graphics_pipeline(pipeline, layout)
            .expect("pipeline set");
        self.device.build_render_pipeline().expect("pipeline built");
    }

    /// Run one empty frame.
    pub fn empty_frame(&mut self, index: u64) {
        self.device.begin_frame(index).expect("frame begins");
        self.device.end_frame().expect("frame ends");
    }

    pub fn main_buffer(&self, queue: QueueType) -> CommandBuffer {
        self.device
            .main_command_buffer(queue)
            .expect("main buffer recording")
    }
}

pub fn layout(index: u32) -> PipelineLayout {
    PipelineLayout(RawHandle::new(index, 1))
}

pub fn render_area() -> Rect2D {
    Rect2D::new(0, 0, 640, 480)
}

pub fn pass_info() -> PassInfo {
    PassInfo::new(
        RenderPass(RawHandle::new(1, 1)),
        Framebuffer(RawHandle::new(1, 1)),
        render_area(),
    )
}

/// Secondary buffers allocated so far, in allocation order.
pub fn secondary_buffers(calls: &[ApiCall]) -> Vec<CommandBuffer> {
    calls
        .iter()
        .filter_map(|call| match call {
            ApiCall::AllocateCommandBuffer {
                cmd,
                level: CommandBufferLevel::Secondary,
                ..
            } => Some(*cmd),
            _ => None,
        })
        .collect()
}

/// Secondary buffer lists of every `ExecuteCommands` into `primary`.
pub fn executed_into(calls: &[ApiCall], primary: CommandBuffer) -> Vec<Vec<CommandBuffer>> {
    calls
        .iter()
        .filter_map(|call| match call {
            ApiCall::ExecuteCommands { cmd, secondaries } if *cmd == primary => {
                Some(secondaries.clone())
            }
            _ => None,
        })
        .collect()
}

/// Queues of every submission that carried command buffers, in order.
pub fn submitted_queues(calls: &[ApiCall]) -> Vec<QueueType> {
    calls
        .iter()
        .filter_map(|call| match call {
            ApiCall::QueueSubmit {
                queue,
                command_buffers,
                ..
            } if !command_buffers.is_empty() => Some(*queue),
            _ => None,
        })
        .collect()
}
