//! Recording state: viewports, clears, passes, submissions.

use super::flags::{CommandBufferUsage, ImageAspects, PipelineStages};
use super::handles::{CommandBuffer, Framebuffer, RenderPass};

/// Image layouts, with the raw values Vulkan uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Preinitialized,
    PresentSrc,
}

impl ImageLayout {
    pub const fn as_raw(self) -> i32 {
        match self {
            ImageLayout::Undefined => 0,
            ImageLayout::General => 1,
            ImageLayout::ColorAttachment => 2,
            ImageLayout::DepthStencilAttachment => 3,
            ImageLayout::DepthStencilReadOnly => 4,
            ImageLayout::ShaderReadOnly => 5,
            ImageLayout::TransferSrc => 6,
            ImageLayout::TransferDst => 7,
            ImageLayout::Preinitialized => 8,
            ImageLayout::PresentSrc => 1_000_001_002,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

/// Which pipeline a bind targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

/// An integer rectangle (render areas and scissors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full depth range viewport covering `rect`.
    pub fn from_rect(rect: Rect2D) -> Self {
        Self {
            x: rect.x as f32,
            y: rect.y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearColor {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearDepthStencil {
    pub depth: f32,
    pub stencil: u32,
}

/// Clear value for one render pass attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(ClearColor),
    DepthStencil(ClearDepthStencil),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Size of a mip level, clamped to one texel.
    pub fn mip(self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}

/// Shape of an image targeted by a deferred upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    pub extent: Extent3d,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub aspects: ImageAspects,
}

impl ImageInfo {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            extent: Extent3d::new(width, height, 1),
            mip_levels: 1,
            array_layers: 1,
            aspects: ImageAspects::COLOR,
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }
}

/// One buffer-to-image copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub aspects: ImageAspects,
    pub mip: u32,
    pub layer: u32,
    pub extent: Extent3d,
}

/// Render pass state a secondary command buffer inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InheritanceInfo {
    pub render_pass: Option<RenderPass>,
    pub subpass: u32,
    pub framebuffer: Option<Framebuffer>,
}

/// Arguments for beginning a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeginInfo {
    pub usage: CommandBufferUsage,
    /// Required for secondary command buffers.
    pub inheritance: Option<InheritanceInfo>,
}

impl BeginInfo {
    /// Primary buffer recorded once per frame.
    pub fn one_time() -> Self {
        Self {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            inheritance: None,
        }
    }

    /// Secondary buffer continuing a render pass.
    pub fn render_pass_continue(inheritance: InheritanceInfo) -> Self {
        Self {
            usage: CommandBufferUsage::SIMULTANEOUS_USE | CommandBufferUsage::RENDER_PASS_CONTINUE,
            inheritance: Some(inheritance),
        }
    }

    /// Secondary buffer recorded outside any render pass.
    pub fn secondary_outside_pass() -> Self {
        Self {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            inheritance: Some(InheritanceInfo::default()),
        }
    }
}

/// Command buffers submitted together with the stage they wait at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    pub wait_stages: PipelineStages,
    pub command_buffers: Vec<CommandBuffer>,
}

/// Per-subpass dynamic state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubpassInfo {
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Rect2D>,
}

/// A render pass as the device begins it.
#[derive(Debug, Clone, PartialEq)]
pub struct PassInfo {
    pub render_pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub render_area: Rect2D,
    pub clear_values: Vec<ClearValue>,
    pub subpasses: Vec<SubpassInfo>,
}

impl PassInfo {
    /// Single-subpass pass whose viewport and scissor cover `render_area`.
    pub fn new(render_pass: RenderPass, framebuffer: Framebuffer, render_area: Rect2D) -> Self {
        Self {
            render_pass,
            framebuffer,
            render_area,
            clear_values: Vec::new(),
            subpasses: vec![SubpassInfo {
                viewports: vec![Viewport::from_rect(render_area)],
                scissors: vec![render_area],
            }],
        }
    }

    pub fn with_clear(mut self, value: ClearValue) -> Self {
        self.clear_values.push(value);
        self
    }

    pub fn with_subpass(mut self, subpass: SubpassInfo) -> Self {
        self.subpasses.push(subpass);
        self
    }
}

/// Arguments for `cmd_begin_render_pass`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub render_area: Rect2D,
    pub clear_values: Vec<ClearValue>,
    /// Subpass contents come from secondary command buffers.
    pub secondary_contents: bool,
}

/// A range of vertices or indices to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimitiveGroup {
    pub base_vertex: i32,
    pub num_vertices: u32,
    pub base_index: u32,
    /// Zero means a non-indexed draw.
    pub num_indices: u32,
}

impl PrimitiveGroup {
    pub fn vertices(num_vertices: u32) -> Self {
        Self {
            num_vertices,
            ..Default::default()
        }
    }

    pub fn indexed(num_indices: u32) -> Self {
        Self {
            num_indices,
            ..Default::default()
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.num_indices > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_from_rect() {
        let viewport = Viewport::from_rect(Rect2D::new(0, 0, 1920, 1080));
        assert_eq!(viewport.width, 1920.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_mip_extent_clamps() {
        let extent = Extent3d::new(256, 64, 1);
        assert_eq!(extent.mip(3), Extent3d::new(32, 8, 1));
        assert_eq!(extent.mip(10), Extent3d::new(1, 1, 1));
    }

    #[test]
    fn test_render_pass_continue_usage() {
        let info = BeginInfo::render_pass_continue(InheritanceInfo::default());
        assert!(info.usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE));
        assert!(info.usage.contains(CommandBufferUsage::SIMULTANEOUS_USE));
        assert!(info.inheritance.is_some());
    }

    #[test]
    fn test_primitive_group_indexed() {
        assert!(PrimitiveGroup::indexed(36).is_indexed());
        assert!(!PrimitiveGroup::vertices(36).is_indexed());
    }

    #[test]
    fn test_present_layout_raw() {
        assert_eq!(ImageLayout::PresentSrc.as_raw(), 1_000_001_002);
    }
}
