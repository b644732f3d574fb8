//! Commands queued to recording workers.
//!
//! A [`Command`] is one self-contained encode request: it owns every byte it
//! needs (push constant and buffer update payloads are copied in), so it can
//! be built on the frame thread and translated later on a worker thread.
//! The worker turns each command into one [`GpuApi`](crate::GpuApi) call
//! ([`Command::StencilRefs`] sets both faces with two). [`Command::Sync`]
//! makes no call and only signals its completion event.

use std::sync::Arc;

use crate::types::{
    Barrier, BeginInfo, BindPoint, Buffer, CommandBuffer, DescriptorSet, Event, IndexType,
    Pipeline, PipelineLayout, PipelineStages, PrimitiveGroup, QueryPool, Rect2D, ShaderStages,
    Viewport,
};
use crate::worker::CompletionEvent;

/// Arguments of a direct draw. Indexed when `num_indices > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawArgs {
    pub base_vertex: i32,
    pub num_vertices: u32,
    pub base_index: u32,
    pub num_indices: u32,
    pub num_instances: u32,
    pub base_instance: u32,
}

impl DrawArgs {
    pub fn new(group: &PrimitiveGroup, num_instances: u32, base_instance: u32) -> Self {
        Self {
            base_vertex: group.base_vertex,
            num_vertices: group.num_vertices,
            base_index: group.base_index,
            num_indices: group.num_indices,
            num_instances,
            base_instance,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.num_indices > 0
    }
}

/// Arguments of an indirect draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectArgs {
    pub buffer: Buffer,
    pub offset: u64,
    pub draw_count: u32,
    pub stride: u32,
}

/// An encode request for a recording worker.
#[derive(Debug, Clone)]
pub enum Command {
    /// Bind `buffer` to the worker and begin recording it.
    Begin {
        buffer: CommandBuffer,
        info: BeginInfo,
    },
    Reset,
    /// End recording and unbind the buffer and pipeline layout.
    End,
    GraphicsPipeline {
        pipeline: Pipeline,
        layout: PipelineLayout,
    },
    ComputePipeline {
        pipeline: Pipeline,
        layout: PipelineLayout,
    },
    VertexBuffer {
        slot: u32,
        buffer: Buffer,
        offset: u64,
    },
    IndexBuffer {
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    },
    Draw(DrawArgs),
    IndirectDraw(IndirectArgs),
    IndirectIndexedDraw(IndirectArgs),
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// `layout: None` uses the layout of the last bound pipeline.
    BindDescriptors {
        bind_point: BindPoint,
        layout: Option<PipelineLayout>,
        first_set: u32,
        sets: Vec<DescriptorSet>,
        offsets: Vec<u32>,
    },
    PushConstants {
        stages: ShaderStages,
        layout: Option<PipelineLayout>,
        offset: u32,
        data: Box<[u8]>,
    },
    Viewport {
        index: u32,
        viewport: Viewport,
    },
    ViewportArray {
        first: u32,
        viewports: Vec<Viewport>,
    },
    Scissor {
        index: u32,
        rect: Rect2D,
    },
    ScissorArray {
        first: u32,
        rects: Vec<Rect2D>,
    },
    StencilRefs {
        front: u32,
        back: u32,
    },
    /// Compare mask for both faces.
    StencilReadMask(u32),
    /// Write mask for both faces.
    StencilWriteMask(u32),
    UpdateBuffer {
        buffer: Buffer,
        offset: u64,
        data: Box<[u8]>,
    },
    SetEvent {
        event: Event,
        stages: PipelineStages,
    },
    ResetEvent {
        event: Event,
        stages: PipelineStages,
    },
    WaitForEvent {
        event: Event,
        barrier: Barrier,
    },
    Barrier(Barrier),
    Timestamp {
        pool: QueryPool,
        index: u32,
        stage: PipelineStages,
    },
    BeginQuery {
        pool: QueryPool,
        index: u32,
        precise: bool,
    },
    EndQuery {
        pool: QueryPool,
        index: u32,
    },
    BeginMarker {
        label: String,
        color: [f32; 4],
    },
    EndMarker,
    InsertMarker {
        label: String,
        color: [f32; 4],
    },
    /// Signal the event once every earlier command has been translated.
    Sync(Arc<CompletionEvent>),
}

/// Fieldless tag of a [`Command`], for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Begin,
    Reset,
    End,
    GraphicsPipeline,
    ComputePipeline,
    VertexBuffer,
    IndexBuffer,
    Draw,
    IndirectDraw,
    IndirectIndexedDraw,
    Dispatch,
    BindDescriptors,
    PushConstants,
    Viewport,
    ViewportArray,
    Scissor,
    ScissorArray,
    StencilRefs,
    StencilReadMask,
    StencilWriteMask,
    UpdateBuffer,
    SetEvent,
    ResetEvent,
    WaitForEvent,
    Barrier,
    Timestamp,
    BeginQuery,
    EndQuery,
    BeginMarker,
    EndMarker,
    InsertMarker,
    Sync,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Begin { .. } => CommandKind::Begin,
            Self::Reset => CommandKind::Reset,
            Self::End => CommandKind::End,
            Self::GraphicsPipeline { .. } => CommandKind::GraphicsPipeline,
            Self::ComputePipeline { .. } => CommandKind::ComputePipeline,
            Self::VertexBuffer { .. } => CommandKind::VertexBuffer,
            Self::IndexBuffer { .. } => CommandKind::IndexBuffer,
            Self::Draw(_) => CommandKind::Draw,
            Self::IndirectDraw(_) => CommandKind::IndirectDraw,
            Self::IndirectIndexedDraw(_) => CommandKind::IndirectIndexedDraw,
            Self::Dispatch { .. } => CommandKind::Dispatch,
            Self::BindDescriptors { .. } => CommandKind::BindDescriptors,
            Self::PushConstants { .. } => CommandKind::PushConstants,
            Self::Viewport { .. } => CommandKind::Viewport,
            Self::ViewportArray { .. } => CommandKind::ViewportArray,
            Self::Scissor { .. } => CommandKind::Scissor,
            Self::ScissorArray { .. } => CommandKind::ScissorArray,
            Self::StencilRefs { .. } => CommandKind::StencilRefs,
            Self::StencilReadMask(_) => CommandKind::StencilReadMask,
            Self::StencilWriteMask(_) => CommandKind::StencilWriteMask,
            Self::UpdateBuffer { .. } => CommandKind::UpdateBuffer,
            Self::SetEvent { .. } => CommandKind::SetEvent,
            Self::ResetEvent { .. } => CommandKind::ResetEvent,
            Self::WaitForEvent { .. } => CommandKind::WaitForEvent,
            Self::Barrier(_) => CommandKind::Barrier,
            Self::Timestamp { .. } => CommandKind::Timestamp,
            Self::BeginQuery { .. } => CommandKind::BeginQuery,
            Self::EndQuery { .. } => CommandKind::EndQuery,
            Self::BeginMarker { .. } => CommandKind::BeginMarker,
            Self::EndMarker => CommandKind::EndMarker,
            Self::InsertMarker { .. } => CommandKind::InsertMarker,
            Self::Sync(_) => CommandKind::Sync,
        }
    }

    /// Non-indexed draw of `num_vertices` vertices, one instance.
    pub fn draw(num_vertices: u32) -> Self {
        Self::Draw(DrawArgs {
            num_vertices,
            num_instances: 1,
            ..Default::default()
        })
    }

    /// Indexed draw of `num_indices` indices, one instance.
    pub fn draw_indexed(num_indices: u32) -> Self {
        Self::Draw(DrawArgs {
            num_indices,
            num_instances: 1,
            ..Default::default()
        })
    }

    pub fn push_constants(stages: ShaderStages, offset: u32, data: &[u8]) -> Self {
        Self::PushConstants {
            stages,
            layout: None,
            offset,
            data: data.into(),
        }
    }

    pub fn update_buffer(buffer: Buffer, offset: u64, data: &[u8]) -> Self {
        Self::UpdateBuffer {
            buffer,
            offset,
            data: data.into(),
        }
    }
}

static_assertions::assert_impl_all!(Command: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_constructors() {
        match Command::draw(36) {
            Command::Draw(args) => {
                assert!(!args.is_indexed());
                assert_eq!(args.num_vertices, 36);
                assert_eq!(args.num_instances, 1);
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
        match Command::draw_indexed(6) {
            Command::Draw(args) => assert!(args.is_indexed()),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_payloads_are_copied() {
        let mut bytes = vec![1u8, 2, 3, 4];
        let command = Command::push_constants(ShaderStages::VERTEX, 0, &bytes);
        bytes[0] = 9;
        match command {
            Command::PushConstants { data, .. } => assert_eq!(&data[..], &[1, 2, 3, 4]),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_sync_kind() {
        let command = Command::Sync(Arc::new(CompletionEvent::new()));
        assert_eq!(command.kind(), CommandKind::Sync);
    }
}
