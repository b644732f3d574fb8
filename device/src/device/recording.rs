//! Recording calls and the routing of each one.
//!
//! | call kind                         | Main              | Shared        | Local        |
//! |-----------------------------------|-------------------|---------------|--------------|
//! | draws                             | error             | error         | current lane |
//! | state (buffers, stencil, push)    | main graphics     | shared list   | current lane |
//! | graphics descriptor binds         | OnBindGraphicsPipeline | shared list | current lane |
//! | markers, events, queries, barrier | main graphics     | error         | current lane |
//! | dispatch, compute binds           | main graphics     | error         | error        |
//!
//! A state check that fails returns before anything is recorded and leaves
//! the frame intact; an API failure aborts it.

use crate::command::{Command, DrawArgs, IndirectArgs};
use crate::deferred::{DeferredCommand, DeferredKind};
use crate::error::{DeviceError, DeviceResult};
use crate::scheduler::CommandPass;
use crate::types::{
    Barrier, BindPoint, Buffer, DescriptorSet, Event, IndexType, PipelineLayout, PipelineStages,
    PrimitiveGroup, QueryPool, QueueType, Rect2D, ShaderStages, Viewport,
};

use super::{CommandState, RenderDevice};

impl RenderDevice {
    // --- Routing ---

    /// Queue a command on the current draw lane; a pipeline must be bound.
    fn push_local(&mut self, command: Command) -> DeviceResult<()> {
        self.check_recording()?;
        if self.command_state != CommandState::Local {
            return Err(DeviceError::InvalidState {
                expected: "graphics pipeline bound",
                actual: self.command_state.name(),
            });
        }
        let lane = self.draw.current();
        let result = self.draw.push(lane, command, true);
        self.guard(result)
    }

    /// Queue a state command wherever the current command state sends it.
    fn push_state(&mut self, command: Command) -> DeviceResult<()> {
        self.check_recording()?;
        let result = match self.command_state {
            CommandState::Local => {
                let lane = self.draw.current();
                self.draw.push(lane, command, true)
            }
            CommandState::Shared => {
                log::trace!("Sharing {:?} with later draw lanes", command.kind());
                self.shared.push(command);
                Ok(())
            }
            CommandState::Main => self.record_main(QueueType::Graphics, command),
        };
        self.guard(result)
    }

    /// Queue a command on the current lane, or on the main graphics buffer
    /// outside a pass.
    fn push_direct(&mut self, command: Command) -> DeviceResult<()> {
        self.check_recording()?;
        let result = match self.command_state {
            CommandState::Local => {
                let lane = self.draw.current();
                self.draw.push(lane, command, true)
            }
            CommandState::Main => self.record_main(QueueType::Graphics, command),
            CommandState::Shared => {
                return Err(DeviceError::InvalidState {
                    expected: "graphics pipeline bound or no render pass",
                    actual: "shared",
                });
            }
        };
        self.guard(result)
    }

    fn record_main(&mut self, queue: QueueType, command: Command) -> DeviceResult<()> {
        self.main_mut(queue)?.record(command)
    }

    fn shared_layout(&self, layout: Option<PipelineLayout>) -> DeviceResult<PipelineLayout> {
        layout
            .or(self.pending_pipeline.map(|(_, layout)| layout))
            .ok_or(DeviceError::InvalidState {
                expected: "pipeline layout for shared state",
                actual: "no graphics pipeline set",
            })
    }

    fn require_compute_pipeline(&self) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_some() {
            return Err(DeviceError::InvalidState {
                expected: "no render pass",
                actual: "render pass open",
            });
        }
        if self.compute_pipeline.is_none() {
            return Err(DeviceError::InvalidState {
                expected: "compute pipeline bound",
                actual: "no compute pipeline",
            });
        }
        Ok(())
    }

    // --- Vertex input ---

    pub fn set_stream_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: Buffer,
        offset: u64,
    ) -> DeviceResult<()> {
        self.push_state(Command::VertexBuffer {
            slot,
            buffer,
            offset,
        })
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> DeviceResult<()> {
        self.push_state(Command::IndexBuffer {
            buffer,
            offset,
            index_type,
        })
    }

    // --- Viewports and scissors ---

    /// Replace viewport `index` of the current subpass.
    ///
    /// The new value is recorded on the current lane when a pipeline is
    /// bound and reaches later lanes with their pipeline bind.
    pub fn set_viewport(&mut self, index: u32, viewport: Viewport) -> DeviceResult<()> {
        let slot = self.viewport_slot(index)?;
        if self.viewports.len() <= slot {
            self.viewports.resize(slot + 1, Viewport::default());
        }
        self.viewports[slot] = viewport;
        if self.command_state == CommandState::Local {
            self.push_local(Command::Viewport { index, viewport })?;
        }
        Ok(())
    }

    /// Replace scissor `index` of the current subpass.
    pub fn set_scissor_rect(&mut self, index: u32, rect: Rect2D) -> DeviceResult<()> {
        let slot = self.viewport_slot(index)?;
        if self.scissors.len() <= slot {
            self.scissors.resize(slot + 1, Rect2D::default());
        }
        self.scissors[slot] = rect;
        if self.command_state == CommandState::Local {
            self.push_local(Command::Scissor { index, rect })?;
        }
        Ok(())
    }

    fn viewport_slot(&self, index: u32) -> DeviceResult<usize> {
        self.check_recording()?;
        if self.pass.is_none() {
            return Err(DeviceError::InvalidState {
                expected: "render pass open",
                actual: "no render pass",
            });
        }
        let slot = index as usize;
        if slot >= self.config.max_viewports {
            return Err(DeviceError::contract(format!(
                "viewport index {index} exceeds max_viewports ({})",
                self.config.max_viewports
            )));
        }
        Ok(slot)
    }

    // --- Draws and dispatches ---

    /// Draw one instance of `group`, indexed when it has indices.
    pub fn draw(&mut self, group: &PrimitiveGroup) -> DeviceResult<()> {
        self.push_local(Command::Draw(DrawArgs::new(group, 1, 0)))
    }

    pub fn draw_indexed_instanced(
        &mut self,
        group: &PrimitiveGroup,
        num_instances: u32,
        base_instance: u32,
    ) -> DeviceResult<()> {
        self.push_local(Command::Draw(DrawArgs::new(
            group,
            num_instances,
            base_instance,
        )))
    }

    pub fn draw_indirect(&mut self, args: IndirectArgs, indexed: bool) -> DeviceResult<()> {
        let command = if indexed {
            Command::IndirectIndexedDraw(args)
        } else {
            Command::IndirectDraw(args)
        };
        self.push_local(command)
    }

    /// Dispatch on the main graphics buffer with the bound compute pipeline.
    pub fn compute(&mut self, x: u32, y: u32, z: u32) -> DeviceResult<()> {
        self.require_compute_pipeline()?;
        let result = self.record_main(QueueType::Graphics, Command::Dispatch { x, y, z });
        self.guard(result)
    }

    // --- Resource binding ---

    /// Bind graphics descriptor sets.
    ///
    /// `layout: None` uses the layout of the lane's bound pipeline. Outside a
    /// pass the bind is deferred until the next graphics pipeline bind.
    /// Inside a pass without a bound pipeline it joins the shared state,
    /// which needs a layout: the given one or that of the pending pipeline.
    pub fn bind_descriptors_graphics(
        &mut self,
        layout: Option<PipelineLayout>,
        first_set: u32,
        sets: &[DescriptorSet],
        offsets: &[u32],
    ) -> DeviceResult<()> {
        self.check_recording()?;
        match self.command_state {
            CommandState::Local => self.push_local(Command::BindDescriptors {
                bind_point: BindPoint::Graphics,
                layout,
                first_set,
                sets: sets.to_vec(),
                offsets: offsets.to_vec(),
            }),
            CommandState::Shared => {
                let layout = self.shared_layout(layout)?;
                self.push_state(Command::BindDescriptors {
                    bind_point: BindPoint::Graphics,
                    layout: Some(layout),
                    first_set,
                    sets: sets.to_vec(),
                    offsets: offsets.to_vec(),
                })
            }
            CommandState::Main => {
                self.scheduler.push_command(
                    DeferredCommand::new(
                        QueueType::Graphics,
                        DeferredKind::BindDescriptorSets {
                            bind_point: BindPoint::Graphics,
                            layout,
                            first_set,
                            sets: sets.to_vec(),
                            offsets: offsets.to_vec(),
                        },
                    ),
                    CommandPass::OnBindGraphicsPipeline,
                );
                Ok(())
            }
        }
    }

    /// Bind compute descriptor sets on the main graphics buffer.
    pub fn bind_descriptors_compute(
        &mut self,
        first_set: u32,
        sets: &[DescriptorSet],
        offsets: &[u32],
    ) -> DeviceResult<()> {
        self.require_compute_pipeline()?;
        let result = self.record_main(
            QueueType::Graphics,
            Command::BindDescriptors {
                bind_point: BindPoint::Compute,
                layout: None,
                first_set,
                sets: sets.to_vec(),
                offsets: offsets.to_vec(),
            },
        );
        self.guard(result)
    }

    /// Update push constants. Compute ranges go to the main graphics
    /// buffer, graphics ranges follow the command state.
    pub fn update_push_ranges(
        &mut self,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> DeviceResult<()> {
        if stages.contains(ShaderStages::COMPUTE) {
            self.require_compute_pipeline()?;
            let result =
                self.record_main(QueueType::Graphics, Command::push_constants(stages, offset, data));
            return self.guard(result);
        }

        self.check_recording()?;
        let layout = match self.command_state {
            CommandState::Shared => Some(self.shared_layout(None)?),
            CommandState::Main | CommandState::Local => None,
        };
        self.push_state(Command::PushConstants {
            stages,
            layout,
            offset,
            data: data.into(),
        })
    }

    // --- Stencil ---

    pub fn set_stencil_refs(&mut self, front: u32, back: u32) -> DeviceResult<()> {
        self.push_state(Command::StencilRefs { front, back })
    }

    pub fn set_stencil_read_mask(&mut self, mask: u32) -> DeviceResult<()> {
        self.push_state(Command::StencilReadMask(mask))
    }

    pub fn set_stencil_write_mask(&mut self, mask: u32) -> DeviceResult<()> {
        self.push_state(Command::StencilWriteMask(mask))
    }

    // --- Synchronization ---

    /// Record a barrier on `queue`'s main buffer, or on the current draw
    /// lane for graphics while a pipeline is bound.
    pub fn insert_barrier(&mut self, queue: QueueType, barrier: Barrier) -> DeviceResult<()> {
        if queue == QueueType::Graphics {
            return self.push_direct(Command::Barrier(barrier));
        }
        self.check_recording()?;
        let result = self.record_main(queue, Command::Barrier(barrier));
        self.guard(result)
    }

    pub fn set_event(&mut self, event: Event, stages: PipelineStages) -> DeviceResult<()> {
        self.push_direct(Command::SetEvent { event, stages })
    }

    pub fn reset_event(&mut self, event: Event, stages: PipelineStages) -> DeviceResult<()> {
        self.push_direct(Command::ResetEvent { event, stages })
    }

    pub fn wait_for_event(&mut self, event: Event, barrier: Barrier) -> DeviceResult<()> {
        self.push_direct(Command::WaitForEvent { event, barrier })
    }

    // --- Queries ---

    pub fn write_timestamp(
        &mut self,
        pool: QueryPool,
        index: u32,
        stage: PipelineStages,
    ) -> DeviceResult<()> {
        self.push_direct(Command::Timestamp { pool, index, stage })
    }

    pub fn begin_query(&mut self, pool: QueryPool, index: u32, precise: bool) -> DeviceResult<()> {
        self.push_direct(Command::BeginQuery {
            pool,
            index,
            precise,
        })
    }

    pub fn end_query(&mut self, pool: QueryPool, index: u32) -> DeviceResult<()> {
        self.push_direct(Command::EndQuery { pool, index })
    }

    // --- Debug markers ---

    pub fn begin_marker(&mut self, label: impl Into<String>, color: [f32; 4]) -> DeviceResult<()> {
        self.push_direct(Command::BeginMarker {
            label: label.into(),
            color,
        })
    }

    pub fn end_marker(&mut self) -> DeviceResult<()> {
        self.push_direct(Command::EndMarker)
    }

    pub fn insert_marker(&mut self, label: impl Into<String>, color: [f32; 4]) -> DeviceResult<()> {
        self.push_direct(Command::InsertMarker {
            label: label.into(),
            color,
        })
    }
}
