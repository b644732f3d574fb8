//! Vulkan backend via `ash`.
//!
//! [`VulkanApi`] drives a device the application created: it borrows the
//! `ash::Device`, the queues and the instance, and never destroys the device
//! itself. Objects the recording layer creates (pools, command buffers,
//! fences, events, staging buffers) live in handle tables that map the
//! crate's generational handles onto Vulkan handles. Objects created by the
//! application (buffers, images, pipelines, render passes, ...) are
//! entered into the same tables with the `register_*` methods.
//!
//! ```text
//!   Buffer(RawHandle { index: 3, generation: 1 })
//!        │  tables.buffers
//!        ▼
//!   vk::Buffer(0x5555_0000_1234)
//! ```
//!
//! Table lookups take a read lock, so lanes encode in parallel. Queue
//! submission is serialized, as Vulkan requires for a shared `VkQueue`.

use std::ffi::CString;
use std::time::Duration;

use ash::vk;
use lilium_core::{HandleArena, RawHandle};
use parking_lot::{Mutex, RwLock};

use crate::error::DeviceError;
use crate::types::{
    Barrier, BeginInfo, BindPoint, Buffer, BufferImageCopy, ClearColor, ClearDepthStencil,
    ClearValue, CommandBuffer, CommandBufferLevel, CommandPool, DescriptorSet, Event, Fence,
    FenceStatus, Framebuffer, Image, ImageLayout, IndexType, Memory, Pipeline, PipelineLayout,
    PipelineStages, QueryPool, QueueType, Rect2D, RenderPass, RenderPassBegin, ShaderStages,
    StencilFaces, SubmitBatch, SubresourceRange, Viewport,
};

use super::GpuApi;

/// A queue and the family it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct VulkanQueue {
    pub queue: vk::Queue,
    pub family: u32,
}

/// The queues the backend submits to. Missing queues fall back to graphics.
#[derive(Debug, Clone, Copy)]
pub struct VulkanQueues {
    pub graphics: VulkanQueue,
    pub compute: Option<VulkanQueue>,
    pub transfer: Option<VulkanQueue>,
    pub sparse: Option<VulkanQueue>,
}

impl VulkanQueues {
    fn get(&self, queue: QueueType) -> VulkanQueue {
        match queue {
            QueueType::Graphics => Some(self.graphics),
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
            QueueType::Sparse => self.sparse,
        }
        .unwrap_or(self.graphics)
    }
}

#[derive(Default)]
struct Tables {
    command_pools: HandleArena<vk::CommandPool>,
    command_buffers: HandleArena<(vk::CommandBuffer, CommandPool)>,
    fences: HandleArena<vk::Fence>,
    events: HandleArena<vk::Event>,
    buffers: HandleArena<vk::Buffer>,
    images: HandleArena<vk::Image>,
    memory: HandleArena<vk::DeviceMemory>,
    pipelines: HandleArena<vk::Pipeline>,
    pipeline_layouts: HandleArena<vk::PipelineLayout>,
    descriptor_sets: HandleArena<vk::DescriptorSet>,
    query_pools: HandleArena<vk::QueryPool>,
    render_passes: HandleArena<vk::RenderPass>,
    framebuffers: HandleArena<vk::Framebuffer>,
}

fn resolve<T: Copy>(
    arena: &HandleArena<T>,
    raw: RawHandle,
    kind: &'static str,
) -> Result<T, DeviceError> {
    arena
        .get(raw)
        .copied()
        .ok_or_else(|| DeviceError::invalid_handle(kind, raw))
}

fn vk_error(call: &'static str) -> impl Fn(vk::Result) -> DeviceError {
    move |result| match result {
        vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            DeviceError::OutOfMemory
        }
        other => DeviceError::api(call, format!("{other:?}")),
    }
}

/// [`GpuApi`] over an application-owned Vulkan device.
pub struct VulkanApi {
    device: ash::Device,
    queues: VulkanQueues,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    tables: RwLock<Tables>,
    submit_lock: Mutex<()>,
}

impl VulkanApi {
    /// Wrap an existing device.
    ///
    /// `debug_labels` loads `VK_EXT_debug_utils` for the marker commands;
    /// the extension must be enabled on the instance.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queues: VulkanQueues,
        debug_labels: bool,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let debug_utils =
            debug_labels.then(|| ash::ext::debug_utils::Device::new(instance, &device));
        log::info!(
            "Vulkan backend ready: graphics family {}, debug labels {}",
            queues.graphics.family,
            debug_utils.is_some()
        );
        Self {
            device,
            queues,
            memory_properties,
            debug_utils,
            tables: RwLock::new(Tables::default()),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    // --- Application objects ---

    pub fn register_buffer(&self, buffer: vk::Buffer) -> Buffer {
        Buffer(self.tables.write().buffers.insert(buffer))
    }

    pub fn register_image(&self, image: vk::Image) -> Image {
        Image(self.tables.write().images.insert(image))
    }

    pub fn register_memory(&self, memory: vk::DeviceMemory) -> Memory {
        Memory(self.tables.write().memory.insert(memory))
    }

    pub fn register_pipeline(&self, pipeline: vk::Pipeline) -> Pipeline {
        Pipeline(self.tables.write().pipelines.insert(pipeline))
    }

    pub fn register_pipeline_layout(&self, layout: vk::PipelineLayout) -> PipelineLayout {
        PipelineLayout(self.tables.write().pipeline_layouts.insert(layout))
    }

    pub fn register_descriptor_set(&self, set: vk::DescriptorSet) -> DescriptorSet {
        DescriptorSet(self.tables.write().descriptor_sets.insert(set))
    }

    pub fn register_query_pool(&self, pool: vk::QueryPool) -> QueryPool {
        QueryPool(self.tables.write().query_pools.insert(pool))
    }

    pub fn register_render_pass(&self, render_pass: vk::RenderPass) -> RenderPass {
        RenderPass(self.tables.write().render_passes.insert(render_pass))
    }

    pub fn register_framebuffer(&self, framebuffer: vk::Framebuffer) -> Framebuffer {
        Framebuffer(self.tables.write().framebuffers.insert(framebuffer))
    }

    /// The Vulkan command buffer behind `cmd`.
    pub fn raw_command_buffer(&self, cmd: CommandBuffer) -> Result<vk::CommandBuffer, DeviceError> {
        let tables = self.tables.read();
        resolve(&tables.command_buffers, cmd.raw(), CommandBuffer::KIND).map(|(raw, _)| raw)
    }

    fn cmd(&self, tables: &Tables, cmd: CommandBuffer) -> Result<vk::CommandBuffer, DeviceError> {
        resolve(&tables.command_buffers, cmd.raw(), CommandBuffer::KIND).map(|(raw, _)| raw)
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
            })
            .map(|(index, _)| index as u32)
    }

    fn convert_barrier(
        &self,
        tables: &Tables,
        barrier: &Barrier,
    ) -> Result<
        (
            Vec<vk::MemoryBarrier<'static>>,
            Vec<vk::BufferMemoryBarrier<'static>>,
            Vec<vk::ImageMemoryBarrier<'static>>,
        ),
        DeviceError,
    > {
        let memory = barrier
            .memory
            .iter()
            .map(|b| {
                vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::from_raw(b.src_access.bits()))
                    .dst_access_mask(vk::AccessFlags::from_raw(b.dst_access.bits()))
            })
            .collect();

        let mut buffers = Vec::with_capacity(barrier.buffers.len());
        for b in &barrier.buffers {
            buffers.push(
                vk::BufferMemoryBarrier::default()
                    .buffer(resolve(&tables.buffers, b.buffer.raw(), Buffer::KIND)?)
                    .src_access_mask(vk::AccessFlags::from_raw(b.src_access.bits()))
                    .dst_access_mask(vk::AccessFlags::from_raw(b.dst_access.bits()))
                    .src_queue_family_index(self.family(b.src_queue))
                    .dst_queue_family_index(self.family(b.dst_queue))
                    .offset(b.offset)
                    .size(b.size),
            );
        }

        let mut images = Vec::with_capacity(barrier.images.len());
        for b in &barrier.images {
            images.push(
                vk::ImageMemoryBarrier::default()
                    .image(resolve(&tables.images, b.image.raw(), Image::KIND)?)
                    .src_access_mask(vk::AccessFlags::from_raw(b.src_access.bits()))
                    .dst_access_mask(vk::AccessFlags::from_raw(b.dst_access.bits()))
                    .old_layout(convert_layout(b.old_layout))
                    .new_layout(convert_layout(b.new_layout))
                    .src_queue_family_index(self.family(b.src_queue))
                    .dst_queue_family_index(self.family(b.dst_queue))
                    .subresource_range(convert_range(&b.range)),
            );
        }
        Ok((memory, buffers, images))
    }

    fn family(&self, queue: Option<QueueType>) -> u32 {
        queue.map_or(vk::QUEUE_FAMILY_IGNORED, |queue| self.queues.get(queue).family)
    }

    fn label(label: &str, color: [f32; 4]) -> Result<(CString, [f32; 4]), DeviceError> {
        CString::new(label)
            .map(|name| (name, color))
            .map_err(|_| DeviceError::contract(format!("debug label {label:?} contains a NUL byte")))
    }
}

fn convert_layout(layout: ImageLayout) -> vk::ImageLayout {
    vk::ImageLayout::from_raw(layout.as_raw())
}

fn convert_range(range: &SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::from_raw(range.aspects.bits()),
        base_mip_level: range.base_mip,
        level_count: range.mip_count,
        base_array_layer: range.base_layer,
        layer_count: range.layer_count,
    }
}

fn convert_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(stages.bits())
}

fn convert_bind_point(bind_point: BindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

fn convert_rect(rect: &Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.x,
            y: rect.y,
        },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

fn convert_clear_color(value: &ClearColor) -> vk::ClearColorValue {
    match *value {
        ClearColor::Float(float32) => vk::ClearColorValue { float32 },
        ClearColor::Int(int32) => vk::ClearColorValue { int32 },
        ClearColor::Uint(uint32) => vk::ClearColorValue { uint32 },
    }
}

fn convert_clear_depth_stencil(value: &ClearDepthStencil) -> vk::ClearDepthStencilValue {
    vk::ClearDepthStencilValue {
        depth: value.depth,
        stencil: value.stencil,
    }
}

impl GpuApi for VulkanApi {
    fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    fn create_command_pool(&self, queue: QueueType) -> Result<CommandPool, DeviceError> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queues.get(queue).family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.device.create_command_pool(&info, None) }
            .map_err(vk_error("vkCreateCommandPool"))?;
        Ok(CommandPool(self.tables.write().command_pools.insert(pool)))
    }

    fn destroy_command_pool(&self, pool: CommandPool) -> Result<(), DeviceError> {
        let mut tables = self.tables.write();
        let raw = tables
            .command_pools
            .remove(pool.raw())
            .ok_or_else(|| DeviceError::invalid_handle(CommandPool::KIND, pool))?;
        let owned: Vec<RawHandle> = tables
            .command_buffers
            .iter()
            .filter(|(_, (_, owner))| *owner == pool)
            .map(|(handle, _)| handle)
            .collect();
        for handle in owned {
            tables.command_buffers.remove(handle);
        }
        unsafe { self.device.destroy_command_pool(raw, None) };
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPool,
        level: CommandBufferLevel,
    ) -> Result<CommandBuffer, DeviceError> {
        let mut tables = self.tables.write();
        let raw_pool = resolve(&tables.command_pools, pool.raw(), CommandPool::KIND)?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(raw_pool)
            .level(match level {
                CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
                CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
            })
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(vk_error("vkAllocateCommandBuffers"))?;
        let raw = buffers
            .first()
            .copied()
            .ok_or_else(|| DeviceError::api("vkAllocateCommandBuffers", "no buffer returned"))?;
        Ok(CommandBuffer(tables.command_buffers.insert((raw, pool))))
    }

    fn free_command_buffers(
        &self,
        pool: CommandPool,
        buffers: &[CommandBuffer],
    ) -> Result<(), DeviceError> {
        let mut tables = self.tables.write();
        let raw_pool = resolve(&tables.command_pools, pool.raw(), CommandPool::KIND)?;
        let mut raw = Vec::with_capacity(buffers.len());
        for cmd in buffers {
            match tables.command_buffers.get(cmd.raw()) {
                Some((buffer, owner)) if *owner == pool => raw.push(*buffer),
                _ => return Err(DeviceError::invalid_handle(CommandBuffer::KIND, cmd)),
            }
        }
        for cmd in buffers {
            tables.command_buffers.remove(cmd.raw());
        }
        unsafe { self.device.free_command_buffers(raw_pool, &raw) };
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: CommandBuffer,
        info: &BeginInfo,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let mut inheritance = vk::CommandBufferInheritanceInfo::default();
        if let Some(inherit) = &info.inheritance {
            if let Some(render_pass) = inherit.render_pass {
                inheritance = inheritance.render_pass(resolve(
                    &tables.render_passes,
                    render_pass.raw(),
                    RenderPass::KIND,
                )?);
            }
            if let Some(framebuffer) = inherit.framebuffer {
                inheritance = inheritance.framebuffer(resolve(
                    &tables.framebuffers,
                    framebuffer.raw(),
                    Framebuffer::KIND,
                )?);
            }
            inheritance = inheritance.subpass(inherit.subpass);
        }
        let mut begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::from_raw(info.usage.bits()));
        if info.inheritance.is_some() {
            begin = begin.inheritance_info(&inheritance);
        }
        unsafe { self.device.begin_command_buffer(raw, &begin) }
            .map_err(vk_error("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe { self.device.end_command_buffer(raw) }.map_err(vk_error("vkEndCommandBuffer"))
    }

    fn reset_command_buffer(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device
                .reset_command_buffer(raw, vk::CommandBufferResetFlags::empty())
        }
        .map_err(vk_error("vkResetCommandBuffer"))
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: CommandBuffer,
        bind_point: BindPoint,
        pipeline: Pipeline,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let pipeline = resolve(&tables.pipelines, pipeline.raw(), Pipeline::KIND)?;
        unsafe {
            self.device
                .cmd_bind_pipeline(raw, convert_bind_point(bind_point), pipeline)
        };
        Ok(())
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBuffer,
        slot: u32,
        buffer: Buffer,
        offset: u64,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let buffer = resolve(&tables.buffers, buffer.raw(), Buffer::KIND)?;
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(raw, slot, &[buffer], &[offset])
        };
        Ok(())
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let buffer = resolve(&tables.buffers, buffer.raw(), Buffer::KIND)?;
        let index_type = match index_type {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(raw, buffer, offset, index_type)
        };
        Ok(())
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
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let layout = resolve(&tables.pipeline_layouts, layout.raw(), PipelineLayout::KIND)?;
        let sets = sets
            .iter()
            .map(|set| resolve(&tables.descriptor_sets, set.raw(), DescriptorSet::KIND))
            .collect::<Result<Vec<_>, _>>()?;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                raw,
                convert_bind_point(bind_point),
                layout,
                first_set,
                &sets,
                dynamic_offsets,
            )
        };
        Ok(())
    }

    fn cmd_push_constants(
        &self,
        cmd: CommandBuffer,
        layout: PipelineLayout,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let layout = resolve(&tables.pipeline_layouts, layout.raw(), PipelineLayout::KIND)?;
        unsafe {
            self.device.cmd_push_constants(
                raw,
                layout,
                vk::ShaderStageFlags::from_raw(stages.bits()),
                offset,
                data,
            )
        };
        Ok(())
    }

    fn cmd_draw(
        &self,
        cmd: CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device
                .cmd_draw(raw, vertex_count, instance_count, first_vertex, first_instance)
        };
        Ok(())
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
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device.cmd_draw_indexed(
                raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
        Ok(())
    }

    fn cmd_draw_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let buffer = resolve(&tables.buffers, buffer.raw(), Buffer::KIND)?;
        unsafe {
            self.device
                .cmd_draw_indirect(raw, buffer, offset, draw_count, stride)
        };
        Ok(())
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let buffer = resolve(&tables.buffers, buffer.raw(), Buffer::KIND)?;
        unsafe {
            self.device
                .cmd_draw_indexed_indirect(raw, buffer, offset, draw_count, stride)
        };
        Ok(())
    }

    fn cmd_dispatch(&self, cmd: CommandBuffer, x: u32, y: u32, z: u32) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe { self.device.cmd_dispatch(raw, x, y, z) };
        Ok(())
    }

    fn cmd_set_viewports(
        &self,
        cmd: CommandBuffer,
        first: u32,
        viewports: &[Viewport],
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        let viewports: Vec<vk::Viewport> = viewports
            .iter()
            .map(|v| vk::Viewport {
                x: v.x,
                y: v.y,
                width: v.width,
                height: v.height,
                min_depth: v.min_depth,
                max_depth: v.max_depth,
            })
            .collect();
        unsafe { self.device.cmd_set_viewport(raw, first, &viewports) };
        Ok(())
    }

    fn cmd_set_scissors(
        &self,
        cmd: CommandBuffer,
        first: u32,
        scissors: &[Rect2D],
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        let scissors: Vec<vk::Rect2D> = scissors.iter().map(convert_rect).collect();
        unsafe { self.device.cmd_set_scissor(raw, first, &scissors) };
        Ok(())
    }

    fn cmd_set_stencil_reference(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        reference: u32,
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device.cmd_set_stencil_reference(
                raw,
                vk::StencilFaceFlags::from_raw(faces.bits()),
                reference,
            )
        };
        Ok(())
    }

    fn cmd_set_stencil_compare_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device.cmd_set_stencil_compare_mask(
                raw,
                vk::StencilFaceFlags::from_raw(faces.bits()),
                mask,
            )
        };
        Ok(())
    }

    fn cmd_set_stencil_write_mask(
        &self,
        cmd: CommandBuffer,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device.cmd_set_stencil_write_mask(
                raw,
                vk::StencilFaceFlags::from_raw(faces.bits()),
                mask,
            )
        };
        Ok(())
    }

    fn cmd_update_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let buffer = resolve(&tables.buffers, buffer.raw(), Buffer::KIND)?;
        unsafe { self.device.cmd_update_buffer(raw, buffer, offset, data) };
        Ok(())
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBuffer,
        src: Buffer,
        image: Image,
        layout: ImageLayout,
        region: &BufferImageCopy,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let src = resolve(&tables.buffers, src.raw(), Buffer::KIND)?;
        let image = resolve(&tables.images, image.raw(), Image::KIND)?;
        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.buffer_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::from_raw(region.aspects.bits()),
                mip_level: region.mip,
                base_array_layer: region.layer,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: region.extent.width,
                height: region.extent.height,
                depth: region.extent.depth,
            });
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(raw, src, image, convert_layout(layout), &[copy])
        };
        Ok(())
    }

    fn cmd_clear_color_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearColor,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let image = resolve(&tables.images, image.raw(), Image::KIND)?;
        unsafe {
            self.device.cmd_clear_color_image(
                raw,
                image,
                convert_layout(layout),
                &convert_clear_color(value),
                &[convert_range(range)],
            )
        };
        Ok(())
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        cmd: CommandBuffer,
        image: Image,
        layout: ImageLayout,
        value: &ClearDepthStencil,
        range: &SubresourceRange,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let image = resolve(&tables.images, image.raw(), Image::KIND)?;
        unsafe {
            self.device.cmd_clear_depth_stencil_image(
                raw,
                image,
                convert_layout(layout),
                &convert_clear_depth_stencil(value),
                &[convert_range(range)],
            )
        };
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, cmd: CommandBuffer, barrier: &Barrier) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let (memory, buffers, images) = self.convert_barrier(&tables, barrier)?;
        unsafe {
            self.device.cmd_pipeline_barrier(
                raw,
                convert_stages(barrier.src_stages),
                convert_stages(barrier.dst_stages),
                vk::DependencyFlags::from_raw(barrier.dependency.bits()),
                &memory,
                &buffers,
                &images,
            )
        };
        Ok(())
    }

    fn cmd_set_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let event = resolve(&tables.events, event.raw(), Event::KIND)?;
        unsafe { self.device.cmd_set_event(raw, event, convert_stages(stages)) };
        Ok(())
    }

    fn cmd_reset_event(
        &self,
        cmd: CommandBuffer,
        event: Event,
        stages: PipelineStages,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let event = resolve(&tables.events, event.raw(), Event::KIND)?;
        unsafe { self.device.cmd_reset_event(raw, event, convert_stages(stages)) };
        Ok(())
    }

    fn cmd_wait_events(
        &self,
        cmd: CommandBuffer,
        events: &[Event],
        barrier: &Barrier,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let events = events
            .iter()
            .map(|event| resolve(&tables.events, event.raw(), Event::KIND))
            .collect::<Result<Vec<_>, _>>()?;
        let (memory, buffers, images) = self.convert_barrier(&tables, barrier)?;
        unsafe {
            self.device.cmd_wait_events(
                raw,
                &events,
                convert_stages(barrier.src_stages),
                convert_stages(barrier.dst_stages),
                &memory,
                &buffers,
                &images,
            )
        };
        Ok(())
    }

    fn cmd_write_timestamp(
        &self,
        cmd: CommandBuffer,
        stage: PipelineStages,
        pool: QueryPool,
        index: u32,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let pool = resolve(&tables.query_pools, pool.raw(), QueryPool::KIND)?;
        unsafe {
            self.device
                .cmd_write_timestamp(raw, convert_stages(stage), pool, index)
        };
        Ok(())
    }

    fn cmd_begin_query(
        &self,
        cmd: CommandBuffer,
        pool: QueryPool,
        index: u32,
        precise: bool,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let pool = resolve(&tables.query_pools, pool.raw(), QueryPool::KIND)?;
        let flags = if precise {
            vk::QueryControlFlags::PRECISE
        } else {
            vk::QueryControlFlags::empty()
        };
        unsafe { self.device.cmd_begin_query(raw, pool, index, flags) };
        Ok(())
    }

    fn cmd_end_query(&self, cmd: CommandBuffer, pool: QueryPool, index: u32) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let pool = resolve(&tables.query_pools, pool.raw(), QueryPool::KIND)?;
        unsafe { self.device.cmd_end_query(raw, pool, index) };
        Ok(())
    }

    fn cmd_begin_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        color: [f32; 4],
    ) -> Result<(), DeviceError> {
        let Some(debug_utils) = &self.debug_utils else {
            return Ok(());
        };
        let raw = self.cmd(&self.tables.read(), cmd)?;
        let (name, color) = Self::label(label, color)?;
        let info = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(raw, &info) };
        Ok(())
    }

    fn cmd_end_label(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let Some(debug_utils) = &self.debug_utils else {
            return Ok(());
        };
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe { debug_utils.cmd_end_debug_utils_label(raw) };
        Ok(())
    }

    fn cmd_insert_label(
        &self,
        cmd: CommandBuffer,
        label: &str,
        color: [f32; 4],
    ) -> Result<(), DeviceError> {
        let Some(debug_utils) = &self.debug_utils else {
            return Ok(());
        };
        let raw = self.cmd(&self.tables.read(), cmd)?;
        let (name, color) = Self::label(label, color)?;
        let info = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        unsafe { debug_utils.cmd_insert_debug_utils_label(raw, &info) };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBuffer,
        begin: &RenderPassBegin,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let render_pass = resolve(&tables.render_passes, begin.render_pass.raw(), RenderPass::KIND)?;
        let framebuffer =
            resolve(&tables.framebuffers, begin.framebuffer.raw(), Framebuffer::KIND)?;
        let clear_values: Vec<vk::ClearValue> = begin
            .clear_values
            .iter()
            .map(|value| match value {
                ClearValue::Color(color) => vk::ClearValue {
                    color: convert_clear_color(color),
                },
                ClearValue::DepthStencil(depth_stencil) => vk::ClearValue {
                    depth_stencil: convert_clear_depth_stencil(depth_stencil),
                },
            })
            .collect();
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(convert_rect(&begin.render_area))
            .clear_values(&clear_values);
        let contents = if begin.secondary_contents {
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
        } else {
            vk::SubpassContents::INLINE
        };
        unsafe { self.device.cmd_begin_render_pass(raw, &info, contents) };
        Ok(())
    }

    fn cmd_next_subpass(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe {
            self.device
                .cmd_next_subpass(raw, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS)
        };
        Ok(())
    }

    fn cmd_end_render_pass(&self, cmd: CommandBuffer) -> Result<(), DeviceError> {
        let raw = self.cmd(&self.tables.read(), cmd)?;
        unsafe { self.device.cmd_end_render_pass(raw) };
        Ok(())
    }

    fn cmd_execute_commands(
        &self,
        cmd: CommandBuffer,
        secondaries: &[CommandBuffer],
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let raw = self.cmd(&tables, cmd)?;
        let secondaries = secondaries
            .iter()
            .map(|secondary| self.cmd(&tables, *secondary))
            .collect::<Result<Vec<_>, _>>()?;
        unsafe { self.device.cmd_execute_commands(raw, &secondaries) };
        Ok(())
    }

    fn queue_submit(
        &self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<Fence>,
    ) -> Result<(), DeviceError> {
        let tables = self.tables.read();
        let fence = match fence {
            Some(fence) => resolve(&tables.fences, fence.raw(), Fence::KIND)?,
            None => vk::Fence::null(),
        };
        let buffers = batches
            .iter()
            .map(|batch| {
                batch
                    .command_buffers
                    .iter()
                    .map(|cmd| self.cmd(&tables, *cmd))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        drop(tables);

        let submits: Vec<vk::SubmitInfo> = buffers
            .iter()
            .map(|buffers| vk::SubmitInfo::default().command_buffers(buffers))
            .collect();
        let target = self.queues.get(queue).queue;
        let _guard = self.submit_lock.lock();
        unsafe { self.device.queue_submit(target, &submits, fence) }
            .map_err(vk_error("vkQueueSubmit"))
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence, DeviceError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }
            .map_err(vk_error("vkCreateFence"))?;
        Ok(Fence(self.tables.write().fences.insert(fence)))
    }

    fn destroy_fence(&self, fence: Fence) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .fences
            .remove(fence.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Fence::KIND, fence))?;
        unsafe { self.device.destroy_fence(raw, None) };
        Ok(())
    }

    fn get_fence_status(&self, fence: Fence) -> Result<FenceStatus, DeviceError> {
        let raw = resolve(&self.tables.read().fences, fence.raw(), Fence::KIND)?;
        match unsafe { self.device.get_fence_status(raw) } {
            Ok(true) => Ok(FenceStatus::Signaled),
            Ok(false) => Ok(FenceStatus::Unsignaled),
            Err(e) => Err(vk_error("vkGetFenceStatus")(e)),
        }
    }

    fn wait_for_fences(
        &self,
        fences: &[Fence],
        wait_all: bool,
        timeout: Duration,
    ) -> Result<bool, DeviceError> {
        let raw = {
            let tables = self.tables.read();
            fences
                .iter()
                .map(|fence| resolve(&tables.fences, fence.raw(), Fence::KIND))
                .collect::<Result<Vec<_>, _>>()?
        };
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&raw, wait_all, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("vkWaitForFences")(e)),
        }
    }

    fn reset_fences(&self, fences: &[Fence]) -> Result<(), DeviceError> {
        let raw = {
            let tables = self.tables.read();
            fences
                .iter()
                .map(|fence| resolve(&tables.fences, fence.raw(), Fence::KIND))
                .collect::<Result<Vec<_>, _>>()?
        };
        unsafe { self.device.reset_fences(&raw) }.map_err(vk_error("vkResetFences"))
    }

    fn create_event(&self) -> Result<Event, DeviceError> {
        let info = vk::EventCreateInfo::default();
        let event = unsafe { self.device.create_event(&info, None) }
            .map_err(vk_error("vkCreateEvent"))?;
        Ok(Event(self.tables.write().events.insert(event)))
    }

    fn destroy_event(&self, event: Event) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .events
            .remove(event.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Event::KIND, event))?;
        unsafe { self.device.destroy_event(raw, None) };
        Ok(())
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<(Buffer, Memory), DeviceError> {
        let size = data.len().max(1) as u64;
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(vk_error("vkCreateBuffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let host_visible =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let Some(memory_type) = self.find_memory_type(requirements.memory_type_bits, host_visible)
        else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(DeviceError::api(
                "vkAllocateMemory",
                "no host-visible coherent memory type for staging",
            ));
        };

        let allocate = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { self.device.allocate_memory(&allocate, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(vk_error("vkAllocateMemory")(e));
            }
        };

        let uploaded = unsafe {
            self.device
                .bind_buffer_memory(buffer, memory, 0)
                .and_then(|()| {
                    self.device
                        .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                })
                .map(|mapped| {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
                    self.device.unmap_memory(memory);
                })
        };
        if let Err(e) = uploaded {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(vk_error("vkMapMemory")(e));
        }

        let mut tables = self.tables.write();
        Ok((
            Buffer(tables.buffers.insert(buffer)),
            Memory(tables.memory.insert(memory)),
        ))
    }

    fn destroy_buffer(&self, buffer: Buffer) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .buffers
            .remove(buffer.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Buffer::KIND, buffer))?;
        unsafe { self.device.destroy_buffer(raw, None) };
        Ok(())
    }

    fn destroy_image(&self, image: Image) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .images
            .remove(image.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Image::KIND, image))?;
        unsafe { self.device.destroy_image(raw, None) };
        Ok(())
    }

    fn free_memory(&self, memory: Memory) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .memory
            .remove(memory.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Memory::KIND, memory))?;
        unsafe { self.device.free_memory(raw, None) };
        Ok(())
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) -> Result<(), DeviceError> {
        let raw = self
            .tables
            .write()
            .pipelines
            .remove(pipeline.raw())
            .ok_or_else(|| DeviceError::invalid_handle(Pipeline::KIND, pipeline))?;
        unsafe { self.device.destroy_pipeline(raw, None) };
        Ok(())
    }
}

impl Drop for VulkanApi {
    fn drop(&mut self) {
        let tables = self.tables.get_mut();
        let leaked = tables.command_pools.len() + tables.fences.len() + tables.events.len();
        if leaked > 0 {
            log::warn!(
                "Vulkan backend dropped with {} pools, fences or events still alive",
                leaked
            );
        }
    }
}

// SAFETY: the wrapped handles are plain ids; ash::Device is a table of
// function pointers. Access to queues is serialized through `submit_lock`.
unsafe impl Send for VulkanApi {}
unsafe impl Sync for VulkanApi {}
