//! Device bookkeeping: frame and command state, per-queue main buffers.

use bitflags::bitflags;

use crate::backend::GpuApi;
use crate::command::Command;
use crate::error::{DeviceError, DeviceResult};
use crate::types::{CommandBuffer, CommandBufferLevel, CommandPool, Fence, QueueType};
use crate::worker::Recorder;

/// Where the device is in its frame cycle.
///
/// ```text
///   Idle ──begin lanes──► RecordingThreads ──submit──► ThreadsSubmitted
///    ▲                                                     │ end_frame
///    └──────── buckets drained ◄──── FencesPending ◄───────┘
/// ```
///
/// `FencesPending` can outlive the frame that produced it: fences may still
/// be outstanding when the next frame begins recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle,
    RecordingThreads,
    ThreadsSubmitted,
    FencesPending,
}

impl FrameState {
    pub const fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::RecordingThreads => "recording threads",
            FrameState::ThreadsSubmitted => "threads submitted",
            FrameState::FencesPending => "fences pending",
        }
    }
}

/// Where graphics state commands are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandState {
    /// Outside a pass. Graphics descriptor binds are deferred to the next
    /// pipeline bind.
    Main,
    /// Inside a pass without a bound pipeline. State is collected and
    /// replayed to every lane started afterwards.
    Shared,
    /// A pipeline is bound; commands go to the current lane.
    Local,
}

impl CommandState {
    pub const fn name(self) -> &'static str {
        match self {
            CommandState::Main => "main",
            CommandState::Shared => "shared",
            CommandState::Local => "local",
        }
    }
}

bitflags! {
    /// What the pending graphics pipeline has been given so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineInfoBits: u32 {
        const SHADER_INFO = 1 << 0;
        const FRAMEBUFFER_INFO = 1 << 1;
        const PIPELINE_BUILT = 1 << 2;
    }
}

/// Counters for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frame_index: u64,
    /// Draw lanes started.
    pub draw_lanes: usize,
    /// Queue submissions with command buffers.
    pub submissions: usize,
    /// Deferred commands executed.
    pub deferred_executed: usize,
    /// Pipelines bound on draw lanes.
    pub pipeline_binds: usize,
}

impl FrameStats {
    pub fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            ..Default::default()
        }
    }
}

/// The primary command buffer a queue records its frame into.
pub(super) struct MainQueue {
    pub queue: QueueType,
    pub pool: CommandPool,
    pub buffer: CommandBuffer,
    pub fence: Fence,
    /// The buffer was submitted with `fence` this frame.
    pub submitted: bool,
    pub recorder: Recorder,
}

impl MainQueue {
    pub fn create(api: &std::sync::Arc<dyn GpuApi>, queue: QueueType) -> DeviceResult<Self> {
        let pool = api.create_command_pool(queue)?;
        let created = api
            .allocate_command_buffer(pool, CommandBufferLevel::Primary)
            .and_then(|buffer| Ok((buffer, api.create_fence(false)?)));
        let (buffer, fence) = match created {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(cleanup) = api.destroy_command_pool(pool) {
                    log::error!("Failed to destroy {} main pool: {}", queue, cleanup);
                }
                return Err(e);
            }
        };

        Ok(Self {
            queue,
            pool,
            buffer,
            fence,
            submitted: false,
            recorder: Recorder::new(std::sync::Arc::clone(api), format!("main {queue}")),
        })
    }

    /// The buffer, while it is recording.
    pub fn recording(&self) -> Option<CommandBuffer> {
        self.recorder.is_recording().then_some(self.buffer)
    }

    pub fn require(&self) -> DeviceResult<CommandBuffer> {
        self.recording().ok_or(DeviceError::InvalidState {
            expected: "main command buffer recording",
            actual: "main command buffer idle",
        })
    }

    pub fn record(&mut self, command: Command) -> DeviceResult<()> {
        self.recorder.record(command)
    }

    /// Reset the buffer to initial state whatever the recorder believed.
    pub fn reset(&mut self, api: &dyn GpuApi) -> DeviceResult<()> {
        self.recorder.clear();
        self.submitted = false;
        api.reset_command_buffer(self.buffer)
    }

    /// Destroy the fence and the pool; the buffer goes with the pool.
    pub fn destroy(self, api: &dyn GpuApi) -> DeviceResult<()> {
        let fence = api.destroy_fence(self.fence);
        let pool = api.destroy_command_pool(self.pool);
        fence.and(pool)
    }
}
