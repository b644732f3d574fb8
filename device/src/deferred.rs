//! Fence-gated and frame-checkpoint GPU operations.
//!
//! A [`DeferredCommand`] is work that cannot run at the point a caller asks
//! for it: freeing a buffer the GPU may still read, transitioning an image
//! between frames, uploading texels through a staging buffer. The
//! [`Scheduler`](crate::Scheduler) holds them until the right
//! [`CommandPass`] and, for the "handle fences" passes, until a fence proves
//! every earlier submission on the command's queue has retired.
//!
//! ```text
//!   push_free_buffer(Transfer, B)
//!          │
//!          ▼
//!   OnHandleTransferFences (pending)
//!          │  end_transfers(): create fence F, submit it
//!          ▼
//!   bucket F: [FreeBuffer(B)]
//!          │  F signaled, pass polled
//!          ▼
//!   run_delegate(FreeBuffer(B)) -> destroy F
//! ```
//!
//! Recording kinds need an open command buffer, which the
//! [`DelegateTarget`] supplies through a [`RecordContext`]. Release kinds
//! only call the API.

use crate::backend::GpuApi;
use crate::error::DeviceError;
use crate::scheduler::CommandPass;
use crate::types::{
    Barrier, BindPoint, Buffer, BufferImageCopy, ClearColor, ClearDepthStencil, CommandBuffer,
    CommandPool, DescriptorSet, Image, ImageBarrier, ImageInfo, ImageLayout, Memory, Pipeline,
    PipelineLayout, PipelineStages, QueueType, SubresourceRange,
};

/// What a deferred command does.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredKind {
    /// Destroy a buffer and free its memory.
    FreeBuffer {
        buffer: Buffer,
        memory: Option<Memory>,
    },
    FreeImage {
        image: Image,
        memory: Option<Memory>,
    },
    /// Host bytes the GPU may still be reading through a staging upload.
    FreeMemory { data: Box<[u8]> },
    FreeCmdBuffers {
        pool: CommandPool,
        buffers: Vec<CommandBuffer>,
    },
    ImageLayoutTransition { barrier: ImageBarrier },
    ImageOwnershipChange { barrier: ImageBarrier },
    ClearColorImage {
        image: Image,
        layout: ImageLayout,
        value: ClearColor,
        range: SubresourceRange,
    },
    ClearDepthStencilImage {
        image: Image,
        layout: ImageLayout,
        value: ClearDepthStencil,
        range: SubresourceRange,
    },
    /// Upload one mip of one layer (or cube face) through a staging buffer.
    UpdateImage {
        image: Image,
        info: ImageInfo,
        mip: u32,
        face: u32,
        data: Box<[u8]>,
    },
    UpdateBuffer {
        buffer: Buffer,
        offset: u64,
        data: Box<[u8]>,
    },
    /// `layout: None` resolves to the layout of the pipeline bound where
    /// the bind is recorded.
    BindDescriptorSets {
        bind_point: BindPoint,
        layout: Option<PipelineLayout>,
        first_set: u32,
        sets: Vec<DescriptorSet>,
        offsets: Vec<u32>,
    },
    DestroyPipeline { pipeline: Pipeline },
}

/// A deferred operation and the queue it was issued against.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredCommand {
    pub queue: QueueType,
    pub kind: DeferredKind,
}

impl DeferredCommand {
    pub fn new(queue: QueueType, kind: DeferredKind) -> Self {
        Self { queue, kind }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            DeferredKind::FreeBuffer { .. } => "FreeBuffer",
            DeferredKind::FreeImage { .. } => "FreeImage",
            DeferredKind::FreeMemory { .. } => "FreeMemory",
            DeferredKind::FreeCmdBuffers { .. } => "FreeCmdBuffers",
            DeferredKind::ImageLayoutTransition { .. } => "ImageLayoutTransition",
            DeferredKind::ImageOwnershipChange { .. } => "ImageOwnershipChange",
            DeferredKind::ClearColorImage { .. } => "ClearColorImage",
            DeferredKind::ClearDepthStencilImage { .. } => "ClearDepthStencilImage",
            DeferredKind::UpdateImage { .. } => "UpdateImage",
            DeferredKind::UpdateBuffer { .. } => "UpdateBuffer",
            DeferredKind::BindDescriptorSets { .. } => "BindDescriptorSets",
            DeferredKind::DestroyPipeline { .. } => "DestroyPipeline",
        }
    }

    /// Queue whose main command buffer this command records into, or `None`
    /// for commands that only release objects.
    pub fn recording_queue(&self) -> Option<QueueType> {
        match self.kind {
            DeferredKind::FreeBuffer { .. }
            | DeferredKind::FreeImage { .. }
            | DeferredKind::FreeMemory { .. }
            | DeferredKind::FreeCmdBuffers { .. }
            | DeferredKind::DestroyPipeline { .. } => None,
            // Uploads always go through the transfer queue.
            DeferredKind::UpdateImage { .. } => Some(QueueType::Transfer),
            _ => Some(self.queue),
        }
    }

    /// Run the command against the API.
    ///
    /// Commands it spawns (staging buffers to release once the upload has
    /// retired) are added to `followups`.
    pub fn execute(
        self,
        ctx: &RecordContext<'_>,
        followups: &mut FollowUps,
    ) -> Result<(), DeviceError> {
        let name = self.name();
        let recording = self.recording_queue();
        let queue = self.queue;
        log::trace!("Deferred {} on {} queue", name, queue);
        if ctx.chunk_size == 0 {
            return Err(DeviceError::contract("deferred update chunk size is zero"));
        }
        let api = ctx.api;

        match self.kind {
            DeferredKind::FreeBuffer { buffer, memory } => {
                api.destroy_buffer(buffer)?;
                if let Some(memory) = memory {
                    api.free_memory(memory)?;
                }
            }
            DeferredKind::FreeImage { image, memory } => {
                api.destroy_image(image)?;
                if let Some(memory) = memory {
                    api.free_memory(memory)?;
                }
            }
            DeferredKind::FreeMemory { data } => {
                log::trace!("Released {} staged bytes", data.len());
            }
            DeferredKind::FreeCmdBuffers { pool, buffers } => {
                api.free_command_buffers(pool, &buffers)?;
            }
            DeferredKind::DestroyPipeline { pipeline } => {
                api.destroy_pipeline(pipeline)?;
            }
            DeferredKind::ImageLayoutTransition { barrier }
            | DeferredKind::ImageOwnershipChange { barrier } => {
                let cmd = ctx.require(recording, name)?;
                let barrier = Barrier::new(PipelineStages::ALL_COMMANDS, PipelineStages::ALL_COMMANDS)
                    .with_image(barrier);
                api.cmd_pipeline_barrier(cmd, &barrier)?;
            }
            DeferredKind::ClearColorImage {
                image,
                layout,
                value,
                range,
            } => {
                let cmd = ctx.require(recording, name)?;
                api.cmd_clear_color_image(cmd, image, layout, &value, &range)?;
            }
            DeferredKind::ClearDepthStencilImage {
                image,
                layout,
                value,
                range,
            } => {
                let cmd = ctx.require(recording, name)?;
                api.cmd_clear_depth_stencil_image(cmd, image, layout, &value, &range)?;
            }
            DeferredKind::UpdateImage {
                image,
                info,
                mip,
                face,
                data,
            } => {
                let cmd = ctx.require(recording, name)?;
                let (staging, memory) = api.create_staging_buffer(&data)?;
                let region = BufferImageCopy {
                    buffer_offset: 0,
                    aspects: info.aspects,
                    mip,
                    layer: face,
                    extent: info.extent.mip(mip),
                };
                if let Err(e) =
                    api.cmd_copy_buffer_to_image(cmd, staging, image, ImageLayout::TransferDst, &region)
                {
                    api.destroy_buffer(staging)?;
                    api.free_memory(memory)?;
                    return Err(e);
                }
                followups.push(
                    DeferredCommand::new(
                        QueueType::Transfer,
                        DeferredKind::FreeBuffer {
                            buffer: staging,
                            memory: Some(memory),
                        },
                    ),
                    CommandPass::OnHandleTransferFences,
                );
                followups.push(
                    DeferredCommand::new(QueueType::Transfer, DeferredKind::FreeMemory { data }),
                    CommandPass::OnHandleTransferFences,
                );
            }
            DeferredKind::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let cmd = ctx.require(recording, name)?;
                let mut chunk_offset = offset;
                for chunk in data.chunks(ctx.chunk_size) {
                    api.cmd_update_buffer(cmd, buffer, chunk_offset, chunk)?;
                    chunk_offset += chunk.len() as u64;
                }
            }
            DeferredKind::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
                offsets,
            } => {
                let cmd = ctx.require(recording, name)?;
                let layout = layout.ok_or_else(|| {
                    DeviceError::contract("main-buffer descriptor bind needs an explicit layout")
                })?;
                api.cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, &sets, &offsets)?;
            }
        }
        Ok(())
    }
}

/// What a deferred command may record into.
pub struct RecordContext<'a> {
    pub api: &'a dyn GpuApi,
    /// Main command buffer per queue, `Some` while it is recording.
    pub main: [Option<CommandBuffer>; QueueType::COUNT],
    /// Largest payload of a single buffer update encode.
    pub chunk_size: usize,
}

impl<'a> RecordContext<'a> {
    /// A context with no recording buffers, for release-only execution.
    pub fn release_only(api: &'a dyn GpuApi) -> Self {
        Self {
            api,
            main: [None; QueueType::COUNT],
            chunk_size: crate::config::DEFAULT_UPDATE_CHUNK_SIZE,
        }
    }

    pub fn main_buffer(&self, queue: QueueType) -> Option<CommandBuffer> {
        self.main[queue.index()]
    }

    fn require(&self, queue: Option<QueueType>, name: &str) -> Result<CommandBuffer, DeviceError> {
        queue.and_then(|q| self.main_buffer(q)).ok_or_else(|| {
            DeviceError::contract(format!(
                "deferred {name} needs a recording {} command buffer",
                queue.map_or("main", QueueType::name)
            ))
        })
    }
}

/// Deferred commands produced while executing others.
#[derive(Debug, Default)]
pub struct FollowUps {
    commands: Vec<(DeferredCommand, CommandPass)>,
}

impl FollowUps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DeferredCommand, pass: CommandPass) {
        self.commands.push((command, pass));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (DeferredCommand, CommandPass)> + '_ {
        self.commands.drain(..)
    }
}

/// Whatever runs deferred commands for the scheduler.
///
/// The render device implements this over its lanes and main buffers; tests
/// implement it over a bare [`RecordContext`] or a recorder of their own.
pub trait DelegateTarget {
    fn run_delegate(
        &mut self,
        command: DeferredCommand,
        followups: &mut FollowUps,
    ) -> Result<(), DeviceError>;
}

impl DelegateTarget for RecordContext<'_> {
    fn run_delegate(
        &mut self,
        command: DeferredCommand,
        followups: &mut FollowUps,
    ) -> Result<(), DeviceError> {
        command.execute(self, followups)
    }
}
