//! Dummy GPU backend for testing and development.
//!
//! This backend performs no GPU work. Instead it:
//!
//! - appends every driver call to a log of [`ApiCall`]s that tests inspect,
//! - tracks the lifetime of pools, command buffers, fences, events and
//!   resources in [`HandleArena`]s, so double frees and stale handles surface
//!   as [`DeviceError::InvalidHandle`],
//! - simulates in-order queue completion for fences.
//!
//! # Queue model
//!
//! ```text
//!  queue_submit(Graphics, .., Some(f0))   in_flight[Graphics] = [f0]
//!  queue_submit(Graphics, .., Some(f1))   in_flight[Graphics] = [f0, f1]
//!  wait_for_fences([f0])                  retires f0        -> [f1]
//!  retire_queue(Graphics)                 retires f1        -> []
//! ```
//!
//! Waiting on a fence lets the simulated GPU run up to that fence, which is
//! what a blocking wait on real hardware amounts to. Fences submitted later on
//! the same queue stay unsignaled until retired explicitly, which lets tests
//! observe work that is still in flight. With [`DummyBackend::auto_retire`]
//! every fence signals as soon as it is submitted.
//!
//! # Failure injection
//!
//! [`DummyBackend::fail_next`] makes the next call of a given kind return an
//! error; [`DummyBackend::lose_device`] makes every later call fail with
//! [`DeviceError::DeviceLost`].

use std::time::{Duration, Instant};

use lilium_core::HandleArena;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::DeviceError;
use crate::types::{
    Barrier, BeginInfo, BindPoint, Buffer, BufferImageCopy, ClearColor, ClearDepthStencil,
    CommandBuffer, CommandBufferLevel, CommandPool, DescriptorSet, Event, Fence, FenceStatus,
    Framebuffer, Image, ImageLayout, IndexType, Memory, Pipeline, PipelineLayout, PipelineStages,
    QueryPool, QueueType, Rect2D, RenderPass, RenderPassBegin, ShaderStages, StencilFaces,
    SubmitBatch, SubresourceRange, Viewport,
};

use super::GpuApi;

/// Kind of driver call, used for failure injection and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCallKind {
    CreateCommandPool,
    DestroyCommandPool,
    AllocateCommandBuffer,
    FreeCommandBuffers,
    BeginCommandBuffer,
    EndCommandBuffer,
    ResetCommandBuffer,
    BindPipeline,
    BindVertexBuffer,
    BindIndexBuffer,
    BindDescriptorSets,
    PushConstants,
    Draw,
    DrawIndexed,
    DrawIndirect,
    DrawIndexedIndirect,
    Dispatch,
    SetViewports,
    SetScissors,
    SetStencilReference,
    SetStencilCompareMask,
    SetStencilWriteMask,
    UpdateBuffer,
    CopyBufferToImage,
    ClearColorImage,
    ClearDepthStencilImage,
    PipelineBarrier,
    SetEvent,
    ResetEvent,
    WaitEvents,
    WriteTimestamp,
    BeginQuery,
    EndQuery,
    BeginLabel,
    EndLabel,
    InsertLabel,
    BeginRenderPass,
    NextSubpass,
    EndRenderPass,
    ExecuteCommands,
    QueueSubmit,
    CreateFence,
    DestroyFence,
    GetFenceStatus,
    WaitForFences,
    ResetFences,
    CreateEvent,
    DestroyEvent,
    CreateStagingBuffer,
    DestroyBuffer,
    DestroyImage,
    FreeMemory,
    DestroyPipeline,
}

/// One logged driver call.
///
/// Fence polling and waiting are not logged; they happen every frame and
/// carry no recording information.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    CreateCommandPool {
        pool: CommandPool,
        queue: QueueType,
    },
    DestroyCommandPool {
        pool: CommandPool,
    },
    AllocateCommandBuffer {
        pool: CommandPool,
        cmd: CommandBuffer,
        level: CommandBufferLevel,
    },
    FreeCommandBuffers {
        pool: CommandPool,
        buffers: Vec<CommandBuffer>,
    },
    BeginCommandBuffer {
        cmd: CommandBuffer,
        info: BeginInfo,
    },
    EndCommandBuffer {
        cmd: CommandBuffer,
    },
    ResetCommandBuffer {
        cmd: CommandBuffer,
    },
    BindPipeline {
        cmd: CommandBuffer,
        bind_point: BindPoint,
        pipeline: Pipeline,
    },
    BindVertexBuffer {
        cmd: CommandBuffer,
        slot: u32,
        buffer: Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    },
    BindDescriptorSets {
        cmd: CommandBuffer,
        bind_point: BindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: Vec<DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        cmd: CommandBuffer,
        layout: PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        cmd: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        cmd: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        cmd: CommandBuffer,
        x: u32,
        y: u32,
        z: u32,
    },
    SetViewports {
        cmd: CommandBuffer,
        first: u32,
        viewports: Vec<Viewport>,
    },
    SetScissors {
        cmd: CommandBuffer,
        first: u32,
        scissors: Vec<Rect2D>,
    },
    SetStencilReference {
        cmd: CommandBuffer,
        faces: StencilFaces,
        reference: u32,
    },
    SetStencilCompareMask {
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    },
    SetStencilWriteMask {
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    },
    UpdateBuffer {
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        size: usize,
    },
    CopyBufferToImage {
        cmd: CommandBuffer,
        src: Buffer,
        image: Image,
        layout: ImageLayout,
        region: BufferImageCopy,
    },
    ClearColorImage {
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: ClearColor,
        range: SubresourceRange,
    },
    ClearDepthStencilImage {
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: ClearDepthStencil,
        range: SubresourceRange,
    },
    PipelineBarrier {
        cmd: CommandBuffer,
        barrier: Barrier,
    },
    SetEvent {
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    },
    ResetEvent {
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    },
    WaitEvents {
        cmd: CommandBuffer,
        events: Vec<Event>,
        barrier: Barrier,
    },
    WriteTimestamp {
        cmd: CommandBuffer,
        stage: PipelineStages,
        pool: QueryPool,
        index: u32,
    },
    BeginQuery {
        cmd: CommandBuffer,
        pool: QueryPool,
        index: u32,
        precise: bool,
    },
    EndQuery {
        cmd: CommandBuffer,
        pool: QueryPool,
        index: u32,
    },
    BeginLabel {
        cmd: CommandBuffer,
        label: String,
    },
    EndLabel {
        cmd: CommandBuffer,
    },
    InsertLabel {
        cmd: CommandBuffer,
        label: String,
    },
    BeginRenderPass {
        cmd: CommandBuffer,
        render_pass: RenderPass,
        framebuffer: Framebuffer,
        secondary_contents: bool,
    },
    NextSubpass {
        cmd: CommandBuffer,
    },
    EndRenderPass {
        cmd: CommandBuffer,
    },
    ExecuteCommands {
        cmd: CommandBuffer,
        secondaries: Vec<CommandBuffer>,
    },
    QueueSubmit {
        queue: QueueType,
        command_buffers: Vec<CommandBuffer>,
        fence: Option<Fence>,
    },
    CreateFence {
        fence: Fence,
        signaled: bool,
    },
    DestroyFence {
        fence: Fence,
    },
    ResetFences {
        fences: Vec<Fence>,
    },
    CreateEvent {
        event: Event,
    },
    DestroyEvent {
        event: Event,
    },
    CreateStagingBuffer {
        buffer: Buffer,
        memory: Memory,
        size: usize,
    },
    DestroyBuffer {
        buffer: Buffer,
    },
    DestroyImage {
        image: Image,
    },
    FreeMemory {
        memory: Memory,
    },
    DestroyPipeline {
        pipeline: Pipeline,
    },
}

impl ApiCall {
    /// The command buffer this call encodes into, if it is an encode call.
    pub fn command_buffer(&self) -> Option<CommandBuffer> {
        match self {
            Self::BeginCommandBuffer { cmd, .. }
            | Self::EndCommandBuffer { cmd }
            | Self::ResetCommandBuffer { cmd }
            | Self::BindPipeline { cmd, .. }
            | Self::BindVertexBuffer { cmd, .. }
            | Self::BindIndexBuffer { cmd, .. }
            | Self::BindDescriptorSets { cmd, .. }
            | Self::PushConstants { cmd, .. }
            | Self::Draw { cmd, .. }
            | Self::DrawIndexed { cmd, .. }
            | Self::DrawIndirect { cmd, .. }
            | Self::DrawIndexedIndirect { cmd, .. }
            | Self::Dispatch { cmd, .. }
            | Self::SetViewports { cmd, .. }
            | Self::SetScissors { cmd, .. }
            | Self::SetStencilReference { cmd, .. }
            | Self::SetStencilCompareMask { cmd, .. }
            | Self::SetStencilWriteMask { cmd, .. }
            | Self::UpdateBuffer { cmd, .. }
            | Self::CopyBufferToImage { cmd, .. }
            | Self::ClearColorImage { cmd, .. }
            | Self::ClearDepthStencilImage { cmd, .. }
            | Self::PipelineBarrier { cmd, .. }
            | Self::SetEvent { cmd, .. }
            | Self::ResetEvent { cmd, .. }
            | Self::WaitEvents { cmd, .. }
            | Self::WriteTimestamp { cmd, .. }
            | Self::BeginQuery { cmd, .. }
            | Self::EndQuery { cmd, .. }
            | Self::BeginLabel { cmd, .. }
            | Self::EndLabel { cmd }
            | Self::InsertLabel { cmd, .. }
            | Self::BeginRenderPass { cmd, .. }
            | Self::NextSubpass { cmd }
            | Self::EndRenderPass { cmd }
            | Self::ExecuteCommands { cmd, .. } => Some(*cmd),
            _ => None,
        }
    }

    pub fn kind(&self) -> ApiCallKind {
        match self {
            Self::CreateCommandPool { .. } => ApiCallKind::CreateCommandPool,
            Self::DestroyCommandPool { .. } => ApiCallKind::DestroyCommandPool,
            Self::AllocateCommandBuffer { .. } => ApiCallKind::AllocateCommandBuffer,
            Self::FreeCommandBuffers { .. } => ApiCallKind::FreeCommandBuffers,
            Self::BeginCommandBuffer { .. } => ApiCallKind::BeginCommandBuffer,
            Self::EndCommandBuffer { .. } => ApiCallKind::EndCommandBuffer,
            Self::ResetCommandBuffer { .. } => ApiCallKind::ResetCommandBuffer,
            Self::BindPipeline { .. } => ApiCallKind::BindPipeline,
            Self::BindVertexBuffer { .. } => ApiCallKind::BindVertexBuffer,
            Self::BindIndexBuffer { .. } => ApiCallKind::BindIndexBuffer,
            Self::BindDescriptorSets { .. } => ApiCallKind::BindDescriptorSets,
            Self::PushConstants { .. } => ApiCallKind::PushConstants,
            Self::Draw { .. } => ApiCallKind::Draw,
            Self::DrawIndexed { .. } => ApiCallKind::DrawIndexed,
            Self::DrawIndirect { .. } => ApiCallKind::DrawIndirect,
            Self::DrawIndexedIndirect { .. } => ApiCallKind::DrawIndexedIndirect,
            Self::Dispatch { .. } => ApiCallKind::Dispatch,
            Self::SetViewports { .. } => ApiCallKind::SetViewports,
            Self::SetScissors { .. } => ApiCallKind::SetScissors,
            Self::SetStencilReference { .. } => ApiCallKind::SetStencilReference,
            Self::SetStencilCompareMask { .. } => ApiCallKind::SetStencilCompareMask,
            Self::SetStencilWriteMask { .. } => ApiCallKind::SetStencilWriteMask,
            Self::UpdateBuffer { .. } => ApiCallKind::UpdateBuffer,
            Self::CopyBufferToImage { .. } => ApiCallKind::CopyBufferToImage,
            Self::ClearColorImage { .. } => ApiCallKind::ClearColorImage,
            Self::ClearDepthStencilImage { .. } => ApiCallKind::ClearDepthStencilImage,
            Self::PipelineBarrier { .. } => ApiCallKind::PipelineBarrier,
            Self::SetEvent { .. } => ApiCallKind::SetEvent,
            Self::ResetEvent { .. } => ApiCallKind::ResetEvent,
            Self::WaitEvents { .. } => ApiCallKind::WaitEvents,
            Self::WriteTimestamp { .. } => ApiCallKind::WriteTimestamp,
            Self::BeginQuery { .. } => ApiCallKind::BeginQuery,
            Self::EndQuery { .. } => ApiCallKind::EndQuery,
            Self::BeginLabel { .. } => ApiCallKind::BeginLabel,
            Self::EndLabel { .. } => ApiCallKind::EndLabel,
            Self::InsertLabel { .. } => ApiCallKind::InsertLabel,
            Self::BeginRenderPass { .. } => ApiCallKind::BeginRenderPass,
            Self::NextSubpass { .. } => ApiCallKind::NextSubpass,
            Self::EndRenderPass { .. } => ApiCallKind::EndRenderPass,
            Self::ExecuteCommands { .. } => ApiCallKind::ExecuteCommands,
            Self::QueueSubmit { .. } => ApiCallKind::QueueSubmit,
            Self::CreateFence { .. } => ApiCallKind::CreateFence,
            Self::DestroyFence { .. } => ApiCallKind::DestroyFence,
            Self::ResetFences { .. } => ApiCallKind::ResetFences,
            Self::CreateEvent { .. } => ApiCallKind::CreateEvent,
            Self::DestroyEvent { .. } => ApiCallKind::DestroyEvent,
            Self::CreateStagingBuffer { .. } => ApiCallKind::CreateStagingBuffer,
            Self::DestroyBuffer { .. } => ApiCallKind::DestroyBuffer,
            Self::DestroyImage { .. } => ApiCallKind::DestroyImage,
            Self::FreeMemory { .. } => ApiCallKind::FreeMemory,
            Self::DestroyPipeline { .. } => ApiCallKind::DestroyPipeline,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    queue: QueueType,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: CommandPool,
    recording: bool,
}

#[derive(Debug, Default)]
struct DummyState {
    calls: Vec<ApiCall>,
    pools: HandleArena<PoolState>,
    command_buffers: HandleArena<CommandBufferState>,
    fences: HandleArena<bool>,
    events: HandleArena<()>,
    buffers: HandleArena<usize>,
    images: HandleArena<()>,
    memory: HandleArena<usize>,
    pipelines: HandleArena<()>,
    /// Submitted, not yet retired fences per queue, in submission order.
    in_flight: [Vec<Fence>; QueueType::COUNT],
    failures: Vec<(ApiCallKind, DeviceError)>,
    lost: bool,
}

impl DummyState {
    fn log(&mut self, call: ApiCall) {
        log::trace!("DummyBackend: {:?}", call);
        self.calls.push(call);
    }

    fn recordable(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        if self.command_buffers.contains(cmd.raw()) {
            Ok(())
        } else {
            Err(DeviceError::invalid_handle(CommandBuffer::KIND, cmd))
        }
    }

    fn fence_signaled(&self, fence: Fence) -> Result<bool, DeviceError> {
        self.fences
            .get(fence.raw())
            .copied()
            .ok_or_else(|| DeviceError::invalid_handle(Fence::KIND, fence))
    }

    /// Let the queue that holds `fence` run up to and including it.
    fn retire_through(&mut self, fence: Fence) {
        for queue in self.in_flight.iter_mut() {
            if let Some(position) = queue.iter().position(|f| *f == fence) {
                for retired in queue.drain(..=position) {
                    if let Some(signaled) = self.fences.get_mut(retired.raw()) {
                        *signaled = true;
                    }
                }
                return;
            }
        }
    }

    fn retire_queue(&mut self, queue: QueueType) {
        let retired = std::mem::take(&mut self.in_flight[queue.index()]);
        for fence in retired {
            if let Some(signaled) = self.fences.get_mut(fence.raw()) {
                *signaled = true;
            }
        }
    }

    fn satisfied(&self, fences: &[Fence], wait_all: bool) -> Result<bool, DeviceError> {
        let mut any = false;
        let mut all = true;
        for fence in fences {
            let signaled = self.fence_signaled(*fence)?;
            any |= signaled;
            all &= signaled;
        }
        Ok(if wait_all { all } else { any || fences.is_empty() })
    }
}

/// Recording dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
    fence_signal: Condvar,
    auto_retire: bool,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Backend whose fences signal only when waited on or retired.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState::default()),
            fence_signal: Condvar::new(),
            auto_retire: false,
        }
    }

    /// Backend whose fences signal as soon as they are submitted.
    pub fn auto_retire() -> Self {
        Self {
            auto_retire: true,
            ..Self::new()
        }
    }

    /// Lock the state for a call of `kind`, applying injected failures.
    fn enter(&self, kind: ApiCallKind) -> Result<MutexGuard<'_, DummyState>, DeviceError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(DeviceError::DeviceLost);
        }
        if let Some(position) = state.failures.iter().position(|(k, _)| *k == kind) {
            let (_, error) = state.failures.remove(position);
            if error == DeviceError::DeviceLost {
                state.lost = true;
            }
            log::trace!("DummyBackend: injected {:?} failure: {}", kind, error);
            return Err(error);
        }
        Ok(state)
    }

    fn encode(&self, kind: ApiCallKind, cmd: CommandBuffer, call: ApiCall) -> Result<(), DeviceError> {
        let mut state = self.enter(kind)?;
        state.recordable(cmd)?;
        state.log(call);
        Ok(())
    }

    // --- Test controls ---

    /// Make the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: ApiCallKind, error: DeviceError) {
        self.state.lock().failures.push((kind, error));
    }

    /// Make every later call fail with [`DeviceError::DeviceLost`].
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
        self.fence_signal.notify_all();
    }

    /// Signal every fence submitted to `queue` so far.
    pub fn retire_queue(&self, queue: QueueType) {
        self.state.lock().retire_queue(queue);
        self.fence_signal.notify_all();
    }

    /// Signal every submitted fence on every queue.
    pub fn retire_all(&self) {
        let mut state = self.state.lock();
        for queue in QueueType::ALL {
            state.retire_queue(queue);
        }
        drop(state);
        self.fence_signal.notify_all();
    }

    /// Signal one fence directly, as if the GPU reached it.
    pub fn signal_fence(&self, fence: Fence) {
        let mut state = self.state.lock();
        state.retire_through(fence);
        if let Some(signaled) = state.fences.get_mut(fence.raw()) {
            *signaled = true;
        }
        drop(state);
        self.fence_signal.notify_all();
    }

    /// Register a buffer created outside the recording layer.
    pub fn create_buffer(&self, size: usize) -> Buffer {
        Buffer(self.state.lock().buffers.insert(size))
    }

    pub fn create_image(&self) -> Image {
        Image(self.state.lock().images.insert(()))
    }

    pub fn allocate_memory(&self, size: usize) -> Memory {
        Memory(self.state.lock().memory.insert(size))
    }

    pub fn create_pipeline(&self) -> Pipeline {
        Pipeline(self.state.lock().pipelines.insert(()))
    }

    // --- Inspection ---

    /// Snapshot of every logged call so far.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Drain the call log.
    pub fn take_calls(&self) -> Vec<ApiCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Logged calls encoded into `cmd`, in order.
    pub fn calls_for(&self, cmd: CommandBuffer) -> Vec<ApiCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.command_buffer() == Some(cmd))
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: ApiCallKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn is_fence_signaled(&self, fence: Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(fence.raw())
            .copied()
            .unwrap_or(false)
    }

    pub fn is_recording(&self, cmd: CommandBuffer) -> bool {
        self.state
            .lock()
            .command_buffers
            .get(cmd.raw())
            .is_some_and(|state| state.recording)
    }

    /// Fences submitted to `queue` that have not signaled yet.
    pub fn in_flight(&self, queue: QueueType) -> usize {
        self.state.lock().in_flight[queue.index()].len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().command_buffers.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn live_events(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_memory(&self) -> usize {
        self.state.lock().memory.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.state.lock().pipelines.len()
    }
}

impl GpuApi for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_command_pool(&self, queue: QueueType) -> Result<CommandPool, DeviceError> {
        let mut state = self.enter(ApiCallKind::CreateCommandPool)?;
        let pool = CommandPool(state.pools.insert(PoolState { queue }));
        state.log(ApiCall::CreateCommandPool { pool, queue });
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: CommandPool) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyCommandPool)?;
        state
            .pools
            .remove(pool.raw())
            .ok_or_else(|| DeviceError::invalid_handle(CommandPool::KIND, pool))?;
        // Destroying a pool frees everything allocated from it.
        let owned: Vec<_> = state
            .command_buffers
            .iter()
            .filter(|(_, cmd)| cmd.pool == pool)
            .map(|(handle, _)| handle)
            .collect();
        for handle in owned {
            state.command_buffers.remove(handle);
        }
        state.log(ApiCall::DestroyCommandPool { pool });
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPool,
        level: CommandBufferLevel,
    ) -> Result<CommandBuffer, DeviceError> {
        let mut state = self.enter(ApiCallKind::AllocateCommandBuffer)?;
        let queue = state
            .pools
            .get(pool.raw())
            .map(|p| p.queue)
            .ok_or_else(|| DeviceError::invalid_handle(CommandPool::KIND, pool))?;
        let cmd = CommandBuffer(state.command_buffers.insert(CommandBufferState {
            pool,
            recording: false,
        }));
        log::trace!("DummyBackend: {} allocated from {} pool", cmd, queue);
        state.log(ApiCall::AllocateCommandBuffer { pool, cmd, level });
        Ok(cmd)
    }

    fn free_command_buffers(
        &self,
        pool: CommandPool,
        buffers: &[CommandBuffer],
    ) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::FreeCommandBuffers)?;
        if !state.pools.contains(pool.raw()) {
            return Err(DeviceError::invalid_handle(CommandPool::KIND, pool));
        }
        for cmd in buffers {
            match state.command_buffers.get(cmd.raw()) {
                Some(owned) if owned.pool == pool => {}
                _ => return Err(DeviceError::invalid_handle(CommandBuffer::KIND, cmd)),
            }
        }
        for cmd in buffers {
            state.command_buffers.remove(cmd.raw());
        }
        state.log(ApiCall::FreeCommandBuffers {
            pool,
            buffers: buffers.to_vec(),
        });
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: CommandBuffer,
        info: &BeginInfo,
    ) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::BeginCommandBuffer)?;
        let buffer = state
            .command_buffers
            .get_mut(cmd.raw())
            .ok_or_else(|| DeviceError::invalid_handle(CommandBuffer::KIND, cmd))?;
        if buffer.recording {
            return Err(DeviceError::contract(format!("{cmd} is already recording")));
        }
        buffer.recording = true;
        state.log(ApiCall::BeginCommandBuffer { cmd, info: *info });
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::EndCommandBuffer)?;
        let buffer = state
            .command_buffers
            .get_mut(cmd.raw())
            .ok_or_else(|| DeviceError::invalid_handle(CommandBuffer::KIND, cmd))?;
        if !buffer.recording {
            return Err(DeviceError::contract(format!("{cmd} is not recording")));
        }
        buffer.recording = false;
        state.log(ApiCall::EndCommandBuffer { cmd });
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::ResetCommandBuffer)?;
        let buffer = state
            .command_buffers
            .get_mut(cmd.raw())
            .ok_or_else(|| DeviceError::invalid_handle(CommandBuffer::KIND, cmd))?;
        buffer.recording = false;
        state.log(ApiCall::ResetCommandBuffer { cmd });
        Ok(())
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: CommandBuffer,
        bind_point: BindPoint,
        pipeline: Pipeline,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BindPipeline,
            cmd,
            ApiCall::BindPipeline {
                cmd,
                bind_point,
                pipeline,
            },
        )
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBuffer,
        slot: u32,
        buffer: Buffer,
        offset: u64,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BindVertexBuffer,
            cmd,
            ApiCall::BindVertexBuffer {
                cmd,
                slot,
                buffer,
                offset,
            },
        )
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BindIndexBuffer,
            cmd,
            ApiCall::BindIndexBuffer {
                cmd,
                buffer,
                offset,
                index_type,
            },
        )
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBuffer,
        bind_point: BindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: &[DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BindDescriptorSets,
            cmd,
            ApiCall::BindDescriptorSets {
                cmd,
                bind_point,
                layout,
                first_set,
                sets: sets.to_vec(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        )
    }

    fn cmd_push_constants(
        &self,
        cmd: CommandBuffer,
        layout: PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::PushConstants,
            cmd,
            ApiCall::PushConstants {
                cmd,
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
        )
    }

    fn cmd_draw(
        &self,
        cmd: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::Draw,
            cmd,
            ApiCall::Draw {
                cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        )
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::DrawIndexed,
            cmd,
            ApiCall::DrawIndexed {
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        )
    }

    fn cmd_draw_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::DrawIndirect,
            cmd,
            ApiCall::DrawIndirect {
                cmd,
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::DrawIndexedIndirect,
            cmd,
            ApiCall::DrawIndexedIndirect {
                cmd,
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    fn cmd_dispatch(&self, cmd: CommandBuffer, x: u32, y: u32, z: u32) -> Result<(), DeviceError> {
        self.encode(ApiCallKind::Dispatch, cmd, ApiCall::Dispatch { cmd, x, y, z })
    }

    fn cmd_set_viewports(
        &self,
        cmd: CommandBuffer,
        first: u32,
        viewports: &[Viewport],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetViewports,
            cmd,
            ApiCall::SetViewports {
                cmd,
                first,
                viewports: viewports.to_vec(),
            },
        )
    }

    fn cmd_set_scissors(
        &self,
        cmd: CommandBuffer,
        first: u32,
        scissors: &[Rect2D],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetScissors,
            cmd,
            ApiCall::SetScissors {
                cmd,
                first,
                scissors: scissors.to_vec(),
            },
        )
    }

    fn cmd_set_stencil_reference(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        reference: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetStencilReference,
            cmd,
            ApiCall::SetStencilReference {
                cmd,
                faces,
                reference,
            },
        )
    }

    fn cmd_set_stencil_compare_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetStencilCompareMask,
            cmd,
            ApiCall::SetStencilCompareMask { cmd, faces, mask },
        )
    }

    fn cmd_set_stencil_write_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetStencilWriteMask,
            cmd,
            ApiCall::SetStencilWriteMask { cmd, faces, mask },
        )
    }

    fn cmd_update_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::UpdateBuffer,
            cmd,
            ApiCall::UpdateBuffer {
                cmd,
                buffer,
                offset,
                size: data.len(),
            },
        )
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBuffer,
        src: Buffer,
        image: Image,
        layout: ImageLayout,
        region: &BufferImageCopy,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::CopyBufferToImage,
            cmd,
            ApiCall::CopyBufferToImage {
                cmd,
                src,
                image,
                layout,
                region: *region,
            },
        )
    }

    fn cmd_clear_color_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearColor,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::ClearColorImage,
            cmd,
            ApiCall::ClearColorImage {
                cmd,
                image,
                layout,
                value: *value,
                range: *range,
            },
        )
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearDepthStencil,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::ClearDepthStencilImage,
            cmd,
            ApiCall::ClearDepthStencilImage {
                cmd,
                image,
                layout,
                value: *value,
                range: *range,
            },
        )
    }

    fn cmd_pipeline_barrier(&self, cmd: CommandBuffer, barrier: &Barrier) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::PipelineBarrier,
            cmd,
            ApiCall::PipelineBarrier {
                cmd,
                barrier: barrier.clone(),
            },
        )
    }

    fn cmd_set_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::SetEvent,
            cmd,
            ApiCall::SetEvent { cmd, event, stages },
        )
    }

    fn cmd_reset_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::ResetEvent,
            cmd,
            ApiCall::ResetEvent { cmd, event, stages },
        )
    }

    fn cmd_wait_events(
        &self,
        cmd: CommandBuffer,
        events: &[Event],
        barrier: &Barrier,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::WaitEvents,
            cmd,
            ApiCall::WaitEvents {
                cmd,
                events: events.to_vec(),
                barrier: barrier.clone(),
            },
        )
    }

    fn cmd_write_timestamp(
        &self,
        cmd: CommandBuffer,
        stage: PipelineStages,
        pool: QueryPool,
        index: u32,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::WriteTimestamp,
            cmd,
            ApiCall::WriteTimestamp {
                cmd,
                stage,
                pool,
                index,
            },
        )
    }

    fn cmd_begin_query(
        &self,
        cmd: CommandBuffer,
        pool: QueryPool,
        index: u32,
        precise: bool,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BeginQuery,
            cmd,
            ApiCall::BeginQuery {
                cmd,
                pool,
                index,
                precise,
            },
        )
    }

    fn cmd_end_query(&self, cmd: CommandBuffer, pool: QueryPool, index: u32) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::EndQuery,
            cmd,
            ApiCall::EndQuery { cmd, pool, index },
        )
    }

    fn cmd_begin_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        _color: [f32; 4],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BeginLabel,
            cmd,
            ApiCall::BeginLabel {
                cmd,
                label: label.to_string(),
            },
        )
    }

    fn cmd_end_label(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        self.encode(ApiCallKind::EndLabel, cmd, ApiCall::EndLabel { cmd })
    }

    fn cmd_insert_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        _color: [f32; 4],
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::InsertLabel,
            cmd,
            ApiCall::InsertLabel {
                cmd,
                label: label.to_string(),
            },
        )
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBuffer,
        begin: &RenderPassBegin,
    ) -> Result<(), DeviceError> {
        self.encode(
            ApiCallKind::BeginRenderPass,
            cmd,
            ApiCall::BeginRenderPass {
                cmd,
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                secondary_contents: begin.secondary_contents,
            },
        )
    }

    fn cmd_next_subpass(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        self.encode(ApiCallKind::NextSubpass, cmd, ApiCall::NextSubpass { cmd })
    }

    fn cmd_end_render_pass(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        self.encode(ApiCallKind::EndRenderPass, cmd, ApiCall::EndRenderPass { cmd })
    }

    fn cmd_execute_commands(
        &self,
        cmd: CommandBuffer,
        secondaries: &[CommandBuffer],
    ) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::ExecuteCommands)?;
        state.recordable(cmd)?;
        for secondary in secondaries {
            state.recordable(*secondary)?;
        }
        state.log(ApiCall::ExecuteCommands {
            cmd,
            secondaries: secondaries.to_vec(),
        });
        Ok(())
    }

    fn queue_submit(
        &self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<Fence>,
    ) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::QueueSubmit)?;
        let command_buffers: Vec<CommandBuffer> = batches
            .iter()
            .flat_map(|batch| batch.command_buffers.iter().copied())
            .collect();
        for cmd in &command_buffers {
            match state.command_buffers.get(cmd.raw()) {
                Some(buffer) if buffer.recording => {
                    return Err(DeviceError::contract(format!(
                        "{cmd} submitted while still recording"
                    )));
                }
                Some(_) => {}
                None => return Err(DeviceError::invalid_handle(CommandBuffer::KIND, cmd)),
            }
        }
        if let Some(fence) = fence {
            if state.fence_signaled(fence)? {
                return Err(DeviceError::contract(format!(
                    "{fence} submitted while already signaled"
                )));
            }
            if self.auto_retire {
                if let Some(signaled) = state.fences.get_mut(fence.raw()) {
                    *signaled = true;
                }
            } else {
                state.in_flight[queue.index()].push(fence);
            }
        }
        state.log(ApiCall::QueueSubmit {
            queue,
            command_buffers,
            fence,
        });
        drop(state);
        if fence.is_some() && self.auto_retire {
            self.fence_signal.notify_all();
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence, DeviceError> {
        let mut state = self.enter(ApiCallKind::CreateFence)?;
        let fence = Fence(state.fences.insert(signaled));
        state.log(ApiCall::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: Fence) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyFence)?;
        state
            .fences
            .remove(fence.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Fence::KIND, fence))?;
        for queue in state.in_flight.iter_mut() {
            if let Some(position) = queue.iter().position(|f| *f == fence) {
                log::warn!("DummyBackend: destroying in-flight {}", fence);
                queue.remove(position);
            }
        }
        state.log(ApiCall::DestroyFence { fence });
        Ok(())
    }

    fn get_fence_status(&self, fence: Fence) -> Result<FenceStatus, DeviceError> {
        let state = self.enter(ApiCallKind::GetFenceStatus)?;
        Ok(if state.fence_signaled(fence)? {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    fn wait_for_fences(
        &self,
        fences: &[Fence],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool, DeviceError> {
        let mut state = self.enter(ApiCallKind::WaitForFences)?;
        for fence in fences {
            state.fence_signaled(*fence)?;
        }
        for fence in fences {
            state.retire_through(*fence);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if state.lost {
                return Err(DeviceError::DeviceLost);
            }
            if state.satisfied(fences, wait_all)? {
                return Ok(true);
            }
            if self.fence_signal.wait_until(&mut state, deadline).timed_out() {
                return state.satisfied(fences, wait_all);
            }
        }
    }

    fn reset_fences(&self, fences: &[Fence]) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::ResetFences)?;
        for fence in fences {
            state.fence_signaled(*fence)?;
        }
        for fence in fences {
            if let Some(signaled) = state.fences.get_mut(fence.raw()) {
                *signaled = false;
            }
        }
        state.log(ApiCall::ResetFences {
            fences: fences.to_vec(),
        });
        Ok(())
    }

    fn create_event(&self) -> Result<Event, DeviceError> {
        let mut state = self.enter(ApiCallKind::CreateEvent)?;
        let event = Event(state.events.insert(()));
        state.log(ApiCall::CreateEvent { event });
        Ok(event)
    }

    fn destroy_event(&self, event: Event) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyEvent)?;
        state
            .events
            .remove(event.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Event::KIND, event))?;
        state.log(ApiCall::DestroyEvent { event });
        Ok(())
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<(Buffer, Memory), DeviceError> {
        let mut state = self.enter(ApiCallKind::CreateStagingBuffer)?;
        let buffer = Buffer(state.buffers.insert(data.len()));
        let memory = Memory(state.memory.insert(data.len()));
        state.log(ApiCall::CreateStagingBuffer {
            buffer,
            memory,
            size: data.len(),
        });
        Ok((buffer, memory))
    }

    fn destroy_buffer(&self, buffer: Buffer) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyBuffer)?;
        state
            .buffers
            .remove(buffer.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Buffer::KIND, buffer))?;
        state.log(ApiCall::DestroyBuffer { buffer });
        Ok(())
    }

    fn destroy_image(&self, image: Image) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyImage)?;
        state
            .images
            .remove(image.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Image::KIND, image))?;
        state.log(ApiCall::DestroyImage { image });
        Ok(())
    }

    fn free_memory(&self, memory: Memory) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::FreeMemory)?;
        state
            .memory
            .remove(memory.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Memory::KIND, memory))?;
        state.log(ApiCall::FreeMemory { memory });
        Ok(())
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) -> Result<(), DeviceError> {
        let mut state = self.enter(ApiCallKind::DestroyPipeline)?;
        state
            .pipelines
            .remove(pipeline.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Pipeline::KIND, pipeline))?;
        state.log(ApiCall::DestroyPipeline { pipeline });
        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_and_buffer_lifetimes() {
        let api = DummyBackend::new();
        let pool = api.create_command_pool(QueueType::Graphics).unwrap();
        let a = api
            .allocate_command_buffer(pool, CommandBufferLevel::Secondary)
            .unwrap();
        let _b = api
            .allocate_command_buffer(pool, CommandBufferLevel::Secondary)
            .unwrap();
        assert_eq!(api.live_command_buffers(), 2);

        api.free_command_buffers(pool, &[a]).unwrap();
        assert_eq!(api.live_command_buffers(), 1);
        assert!(matches!(
            api.free_command_buffers(pool, &[a]),
            Err(DeviceError::InvalidHandle { .. })
        ));

        api.destroy_command_pool(pool).unwrap();
        assert_eq!(api.live_command_buffers(), 0);
        assert_eq!(api.live_command_pools(), 0);
    }

    #[test]
    fn test_encode_into_freed_buffer_fails() {
        let api = DummyBackend::new();
        let pool = api.create_command_pool(QueueType::Graphics).unwrap();
        let cmd = api
            .allocate_command_buffer(pool, CommandBufferLevel::Primary)
            .unwrap();
        api.free_command_buffers(pool, &[cmd]).unwrap();

        assert!(api.cmd_draw(cmd, 3, 1, 0, 0).is_err());
    }

    #[test]
    fn test_wait_retires_queue_in_order() {
        let api = DummyBackend::new();
        let first = api.create_fence(false).unwrap();
        let second = api.create_fence(false).unwrap();
        api.queue_submit(QueueType::Graphics, &[], Some(first)).unwrap();
        api.queue_submit(QueueType::Graphics, &[], Some(second)).unwrap();
        assert_eq!(api.in_flight(QueueType::Graphics), 2);

        assert!(api
            .wait_for_fences(&[first], true, Duration::from_millis(10))
            .unwrap());
        assert_eq!(api.get_fence_status(first).unwrap(), FenceStatus::Signaled);
        assert_eq!(api.get_fence_status(second).unwrap(), FenceStatus::Unsignaled);

        api.retire_queue(QueueType::Graphics);
        assert_eq!(api.get_fence_status(second).unwrap(), FenceStatus::Signaled);
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_times_out() {
        let api = DummyBackend::new();
        let fence = api.create_fence(false).unwrap();
        assert!(!api
            .wait_for_fences(&[fence], true, Duration::from_millis(5))
            .unwrap());
    }

    #[test]
    fn test_auto_retire_signals_on_submit() {
        let api = DummyBackend::auto_retire();
        let fence = api.create_fence(false).unwrap();
        api.queue_submit(QueueType::Transfer, &[], Some(fence)).unwrap();
        assert!(api.is_fence_signaled(fence));
        assert_eq!(api.in_flight(QueueType::Transfer), 0);
    }

    #[test]
    fn test_submit_signaled_fence_is_contract_violation() {
        let api = DummyBackend::new();
        let fence = api.create_fence(true).unwrap();
        assert!(matches!(
            api.queue_submit(QueueType::Graphics, &[], Some(fence)),
            Err(DeviceError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let api = DummyBackend::new();
        api.fail_next(ApiCallKind::CreateFence, DeviceError::OutOfMemory);
        assert_eq!(api.create_fence(false), Err(DeviceError::OutOfMemory));
        assert!(api.create_fence(false).is_ok());
    }

    #[test]
    fn test_device_lost_is_sticky() {
        let api = DummyBackend::new();
        api.fail_next(ApiCallKind::CreateEvent, DeviceError::DeviceLost);
        assert_eq!(api.create_event(), Err(DeviceError::DeviceLost));
        assert_eq!(api.create_fence(false), Err(DeviceError::DeviceLost));
    }

    #[test]
    fn test_double_destroy_buffer() {
        let api = DummyBackend::new();
        let buffer = api.create_buffer(64);
        api.destroy_buffer(buffer).unwrap();
        assert!(matches!(
            api.destroy_buffer(buffer),
            Err(DeviceError::InvalidHandle { kind: "buffer", .. })
        ));
    }
}
