//! Plain data types shared by commands, deferred commands and the GPU API.
//!
//! Handles are opaque `Copy` ids issued by the [`GpuApi`](crate::backend::GpuApi)
//! implementation; the flag types mirror the bit layout of their Vulkan
//! counterparts so a backend can convert them with a single cast.

mod flags;
mod handles;
mod render;
mod sync;

pub use flags::{
    AccessFlags, CommandBufferUsage, DependencyFlags, ImageAspects, PipelineStages, ShaderStages,
    StencilFaces,
};
pub use handles::{
    Buffer, CommandBuffer, CommandPool, DescriptorSet, Event, Fence, Framebuffer, Image, Memory,
    Pipeline, PipelineLayout, QueryPool, RenderPass,
};
pub use render::{
    BeginInfo, BindPoint, BufferImageCopy, ClearColor, ClearDepthStencil, ClearValue,
    CommandBufferLevel, Extent3d, ImageInfo, ImageLayout, IndexType, InheritanceInfo, PassInfo,
    PrimitiveGroup, Rect2D, RenderPassBegin, SubmitBatch, SubpassInfo, Viewport,
};
pub use sync::{Barrier, BufferBarrier, FenceStatus, ImageBarrier, MemoryBarrier, SubresourceRange};

/// The hardware queues work can be submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
    Sparse,
}

impl QueueType {
    /// Number of queue types.
    pub const COUNT: usize = 4;

    /// Every queue type, in index order.
    pub const ALL: [QueueType; Self::COUNT] = [
        QueueType::Graphics,
        QueueType::Compute,
        QueueType::Transfer,
        QueueType::Sparse,
    ];

    /// Dense index for per-queue arrays.
    pub const fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Transfer => 2,
            QueueType::Sparse => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            QueueType::Graphics => "graphics",
            QueueType::Compute => "compute",
            QueueType::Transfer => "transfer",
            QueueType::Sparse => "sparse",
        }
    }
}

impl std::fmt::Display for QueueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_indices_are_dense() {
        for (i, queue) in QueueType::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
        }
    }
}
