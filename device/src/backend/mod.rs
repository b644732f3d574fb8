//! GPU API abstraction layer.
//!
//! Everything the recording workers, the scheduler and the render device ask
//! of the graphics driver goes through the [`GpuApi`] trait. The trait is a
//! thin, handle-based mirror of the Vulkan entry points the recording model
//! needs; it does not own resource creation beyond command pools, fences,
//! events and staging buffers.
//!
//! # Available Backends
//!
//! - [`dummy`] (always built): records every call, tracks object lifetimes and
//!   simulates queue completion. Used by the tests and benches.
//! - `vulkan` (`vulkan-backend` feature): forwards to a real device via `ash`.
//!
//! # Threading
//!
//! Implementations are shared as `Arc<dyn GpuApi>` between the device and its
//! worker threads. Encode calls (`cmd_*`) on *different* command buffers may
//! run concurrently; calls on the same command buffer are serialized by the
//! caller (only one worker ever holds a given buffer).
//!
//! # Errors
//!
//! Every call returns [`DeviceError`]; a lost device must be reported as
//! [`DeviceError::DeviceLost`] so the render device can latch it.

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::time::Duration;

use crate::error::DeviceError;
use crate::types::{
    Barrier, BeginInfo, BindPoint, Buffer, BufferImageCopy, ClearColor, ClearDepthStencil,
    CommandBuffer, CommandBufferLevel, CommandPool, DescriptorSet, Event, Fence, FenceStatus,
    Image, ImageLayout, IndexType, Memory, Pipeline, PipelineLayout, PipelineStages, QueryPool,
    QueueType, Rect2D, RenderPassBegin, ShaderStages, StencilFaces, SubmitBatch,
    SubresourceRange, Viewport,
};

pub use dummy::DummyBackend;

/// Graphics driver entry points used by the recording and scheduling layer.
pub trait GpuApi: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    // --- Command pools and buffers ---

    fn create_command_pool(&self, queue: QueueType) -> Result<CommandPool, DeviceError>;
    fn destroy_command_pool(&self, pool: CommandPool) -> Result<(), DeviceError>;
    fn allocate_command_buffer(
        &self,
        pool: CommandPool,
        level: CommandBufferLevel,
    ) -> Result<CommandBuffer, DeviceError>;
    fn free_command_buffers(
        &self,
        pool: CommandPool,
        buffers: &[CommandBuffer],
    ) -> Result<(), DeviceError>;
    fn begin_command_buffer(&self, cmd: CommandBuffer, info: &BeginInfo)
    -> Result<(), DeviceError>;
    fn end_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError>;
    fn reset_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError>;

    // --- Pipeline and resource binding ---

    fn cmd_bind_pipeline(
        &self,
        cmd: CommandBuffer,
        bind_point: BindPoint,
        pipeline: Pipeline,
    ) -> Result<(), DeviceError>;
    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBuffer,
        slot: u32,
        buffer: Buffer,
        offset: u64,
    ) -> Result<(), DeviceError>;
    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<(), DeviceError>;
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBuffer,
        bind_point: BindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: &[DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<(), DeviceError>;
    fn cmd_push_constants(
        &self,
        cmd: CommandBuffer,
        layout: PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    // --- Draws and dispatches ---

    fn cmd_draw(
        &self,
        cmd: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_draw_indexed(
        &self,
        cmd: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_draw_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_draw_indexed_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_dispatch(&self, cmd: CommandBuffer, x: u32, y: u32, z: u32)
    -> Result<(), DeviceError>;

    // --- Dynamic state ---

    fn cmd_set_viewports(
        &self,
        cmd: CommandBuffer,
        first: u32,
        viewports: &[Viewport],
    ) -> Result<(), DeviceError>;
    fn cmd_set_scissors(
        &self,
        cmd: CommandBuffer,
        first: u32,
        scissors: &[Rect2D],
    ) -> Result<(), DeviceError>;
    fn cmd_set_stencil_reference(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        reference: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_set_stencil_compare_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_set_stencil_write_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError>;

    // --- Transfers and clears ---

    fn cmd_update_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBuffer,
        src: Buffer,
        image: Image,
        layout: ImageLayout,
        region: &BufferImageCopy,
    ) -> Result<(), DeviceError>;
    fn cmd_clear_color_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearColor,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError>;
    fn cmd_clear_depth_stencil_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearDepthStencil,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError>;

    // --- Synchronization inside command buffers ---

    fn cmd_pipeline_barrier(&self, cmd: CommandBuffer, barrier: &Barrier)
    -> Result<(), DeviceError>;
    fn cmd_set_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError>;
    fn cmd_reset_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError>;
    fn cmd_wait_events(
        &self,
        cmd: CommandBuffer,
        events: &[Event],
        barrier: &Barrier,
    ) -> Result<(), DeviceError>;

    // --- Queries and debug labels ---

    fn cmd_write_timestamp(
        &self,
        cmd: CommandBuffer,
        stage: PipelineStages,
        pool: QueryPool,
        index: u32,
    ) -> Result<(), DeviceError>;
    fn cmd_begin_query(
        &self,
        cmd: CommandBuffer,
        pool: QueryPool,
        index: u32,
        precise: bool,
    ) -> Result<(), DeviceError>;
    fn cmd_end_query(&self, cmd: CommandBuffer, pool: QueryPool, index: u32)
    -> Result<(), DeviceError>;
    fn cmd_begin_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        color: [f32; 4],
    ) -> Result<(), DeviceError>;
    fn cmd_end_label(&self, cmd: CommandBuffer) -> Result<(), DeviceError>;
    fn cmd_insert_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        color: [f32; 4],
    ) -> Result<(), DeviceError>;

    // --- Render passes ---

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBuffer,
        begin: &RenderPassBegin,
    ) -> Result<(), DeviceError>;
    fn cmd_next_subpass(&self, cmd: CommandBuffer) -> Result<(), DeviceError>;
    fn cmd_end_render_pass(&self, cmd: CommandBuffer) -> Result<(), DeviceError>;
    /// Execute secondary buffers from a primary one, in slice order.
    fn cmd_execute_commands(
        &self,
        cmd: CommandBuffer,
        secondaries: &[CommandBuffer],
    ) -> Result<(), DeviceError>;

    // --- Submission ---

    /// Submit batches to a queue; the fence (if any) signals once they finish.
    ///
    /// An empty `batches` slice with a fence is a pure fence submission: the
    /// fence signals once everything previously submitted to the queue
    /// finishes.
    fn queue_submit(
        &self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<Fence>,
    ) -> Result<(), DeviceError>;

    // --- Fences and events ---

    fn create_fence(&self, signaled: bool) -> Result<Fence, DeviceError>;
    fn destroy_fence(&self, fence: Fence) -> Result<(), DeviceError>;
    fn get_fence_status(&self, fence: Fence) -> Result<FenceStatus, DeviceError>;
    /// Returns `Ok(false)` when the timeout elapsed first.
    fn wait_for_fences(
        &self,
        fences: &[Fence],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool, DeviceError>;
    fn reset_fences(&self, fences: &[Fence]) -> Result<(), DeviceError>;
    fn create_event(&self) -> Result<Event, DeviceError>;
    fn destroy_event(&self, event: Event) -> Result<(), DeviceError>;

    // --- Resource release ---

    /// Create a host-visible buffer holding a copy of `data`.
    fn create_staging_buffer(&self, data: &[u8]) -> Result<(Buffer, Memory), DeviceError>;
    fn destroy_buffer(&self, buffer: Buffer) -> Result<(), DeviceError>;
    fn destroy_image(&self, image: Image) -> Result<(), DeviceError>;
    fn free_memory(&self, memory: Memory) -> Result<(), DeviceError>;
    fn destroy_pipeline(&self, pipeline: Pipeline) -> Result<(), DeviceError>;
}
