//! Barrier and synchronization descriptions.

use super::flags::{AccessFlags, DependencyFlags, ImageAspects, PipelineStages};
use super::handles::{Buffer, Image};
use super::render::ImageLayout;
use super::QueueType;

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// Part of an image addressed by a barrier, clear or copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub aspects: ImageAspects,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// Every mip and layer of the given aspects.
    pub const ALL_MIPS: u32 = u32::MAX;
    pub const ALL_LAYERS: u32 = u32::MAX;

    pub const fn new(aspects: ImageAspects) -> Self {
        Self {
            aspects,
            base_mip: 0,
            mip_count: Self::ALL_MIPS,
            base_layer: 0,
            layer_count: Self::ALL_LAYERS,
        }
    }

    pub const fn color() -> Self {
        Self::new(ImageAspects::COLOR)
    }

    pub const fn depth_stencil() -> Self {
        Self::new(ImageAspects::DEPTH.union(ImageAspects::STENCIL))
    }

    /// Narrow to a single mip level.
    pub const fn mip(mut self, level: u32) -> Self {
        self.base_mip = level;
        self.mip_count = 1;
        self
    }

    /// Narrow to a single array layer (or cube face).
    pub const fn layer(mut self, layer: u32) -> Self {
        self.base_layer = layer;
        self.layer_count = 1;
        self
    }
}

/// A global memory dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// A dependency on a range of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: Buffer,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    /// Releasing queue for an ownership transfer, `None` otherwise.
    pub src_queue: Option<QueueType>,
    pub dst_queue: Option<QueueType>,
    pub offset: u64,
    /// `u64::MAX` covers the rest of the buffer.
    pub size: u64,
}

impl BufferBarrier {
    pub fn whole(buffer: Buffer, src_access: AccessFlags, dst_access: AccessFlags) -> Self {
        Self {
            buffer,
            src_access,
            dst_access,
            src_queue: None,
            dst_queue: None,
            offset: 0,
            size: u64::MAX,
        }
    }
}

/// A layout transition and/or queue ownership transfer of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: Image,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_queue: Option<QueueType>,
    pub dst_queue: Option<QueueType>,
    pub range: SubresourceRange,
}

impl ImageBarrier {
    /// A same-queue layout transition.
    pub fn layout_transition(
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: SubresourceRange,
    ) -> Self {
        Self {
            image,
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            old_layout,
            new_layout,
            src_queue: None,
            dst_queue: None,
            range,
        }
    }

    /// Hand the image from one queue to another, keeping its layout.
    pub fn ownership_transfer(
        image: Image,
        layout: ImageLayout,
        from: QueueType,
        to: QueueType,
        range: SubresourceRange,
    ) -> Self {
        Self {
            image,
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: layout,
            new_layout: layout,
            src_queue: Some(from),
            dst_queue: Some(to),
            range,
        }
    }

    pub fn with_access(mut self, src: AccessFlags, dst: AccessFlags) -> Self {
        self.src_access = src;
        self.dst_access = dst;
        self
    }

    pub fn is_ownership_transfer(&self) -> bool {
        self.src_queue.is_some() && self.src_queue != self.dst_queue
    }
}

/// A full pipeline barrier: stage masks plus memory, buffer and image
/// dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct Barrier {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub dependency: DependencyFlags,
    pub memory: Vec<MemoryBarrier>,
    pub buffers: Vec<BufferBarrier>,
    pub images: Vec<ImageBarrier>,
}

impl Barrier {
    pub fn new(src_stages: PipelineStages, dst_stages: PipelineStages) -> Self {
        Self {
            src_stages,
            dst_stages,
            dependency: DependencyFlags::empty(),
            memory: Vec::new(),
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyFlags) -> Self {
        self.dependency = dependency;
        self
    }

    pub fn with_memory(mut self, barrier: MemoryBarrier) -> Self {
        self.memory.push(barrier);
        self
    }

    pub fn with_buffer(mut self, barrier: BufferBarrier) -> Self {
        self.buffers.push(barrier);
        self
    }

    pub fn with_image(mut self, barrier: ImageBarrier) -> Self {
        self.images.push(barrier);
        self
    }

    /// True when only an execution dependency is described.
    pub fn is_execution_only(&self) -> bool {
        self.memory.is_empty() && self.buffers.is_empty() && self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lilium_core::RawHandle;

    #[test]
    fn test_barrier_builder() {
        let image = Image(RawHandle::new(1, 1));
        let barrier = Barrier::new(PipelineStages::TRANSFER, PipelineStages::FRAGMENT_SHADER)
            .with_image(
                ImageBarrier::layout_transition(
                    image,
                    ImageLayout::TransferDst,
                    ImageLayout::ShaderReadOnly,
                    SubresourceRange::color(),
                )
                .with_access(AccessFlags::TRANSFER_WRITE, AccessFlags::SHADER_READ),
            );

        assert!(!barrier.is_execution_only());
        assert_eq!(barrier.images.len(), 1);
        assert!(!barrier.images[0].is_ownership_transfer());
    }

    #[test]
    fn test_ownership_transfer() {
        let barrier = ImageBarrier::ownership_transfer(
            Image(RawHandle::new(0, 1)),
            ImageLayout::ShaderReadOnly,
            QueueType::Transfer,
            QueueType::Graphics,
            SubresourceRange::color().mip(2),
        );
        assert!(barrier.is_ownership_transfer());
        assert_eq!(barrier.range.base_mip, 2);
        assert_eq!(barrier.range.mip_count, 1);
    }
}
