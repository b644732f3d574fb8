//! Render passes, pipeline binds and lane lifecycle.
//!
//! Draw lanes only exist inside a render pass. A lane is started lazily the
//! first time the cursor reaches it, inherits the pass, subpass and
//! framebuffer, and gets the shared state of the pass replayed right after
//! its `Begin`. Ending the lanes hands their buffers to `ExecuteCommands`
//! on the main graphics buffer in lane index order and schedules the
//! buffers to be freed once the frame's graphics fence signals.

use crate::command::Command;
use crate::error::{DeviceError, DeviceResult};
use crate::scheduler::CommandPass;
use crate::types::{
    BeginInfo, InheritanceInfo, PassInfo, Pipeline, PipelineLayout, QueueType, RenderPassBegin,
    Viewport,
};
use crate::worker::ThreadCluster;

use super::{CommandState, FrameState, PipelineInfoBits, RenderDevice, free_lane_buffers};

const NO_PASS: DeviceError = DeviceError::InvalidState {
    expected: "render pass open",
    actual: "no render pass",
};

impl RenderDevice {
    // --- Render passes ---

    /// Begin a render pass on the main graphics buffer with secondary
    /// contents and load subpass 0's viewports and scissors.
    pub fn begin_pass(&mut self, info: PassInfo) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_some() {
            return Err(DeviceError::InvalidState {
                expected: "no render pass",
                actual: "render pass open",
            });
        }
        let result = self.begin_pass_inner(info);
        self.guard(result)
    }

    fn begin_pass_inner(&mut self, info: PassInfo) -> DeviceResult<()> {
        let buffer = self.main_buffer(QueueType::Graphics)?;
        self.api.cmd_begin_render_pass(
            buffer,
            &RenderPassBegin {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                render_area: info.render_area,
                clear_values: info.clear_values.clone(),
                secondary_contents: true,
            },
        )?;
        log::trace!(
            "Began pass {} on {} ({} subpasses)",
            info.render_pass,
            buffer,
            info.subpasses.len()
        );

        self.pass = Some(info);
        self.subpass = 0;
        self.load_subpass_state();
        self.shared.clear();
        self.draw.reset_cursor();
        self.command_state = CommandState::Shared;
        self.pipeline_bits.insert(PipelineInfoBits::FRAMEBUFFER_INFO);
        self.run_pass(CommandPass::OnBeginPass)?;
        Ok(())
    }

    /// End the current subpass's lanes and move to the next subpass.
    pub fn next_subpass(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_none() {
            return Err(NO_PASS);
        }
        let result = self.next_subpass_inner();
        self.guard(result)
    }

    fn next_subpass_inner(&mut self) -> DeviceResult<()> {
        self.end_draw_threads(CommandState::Shared)?;
        let buffer = self.main_buffer(QueueType::Graphics)?;
        self.api.cmd_next_subpass(buffer)?;
        self.subpass += 1;
        self.load_subpass_state();
        self.run_pass(CommandPass::OnNextSubpass)?;
        Ok(())
    }

    /// End the pass's lanes, execute them and end the render pass.
    pub fn end_pass(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_none() {
            return Err(NO_PASS);
        }
        let result = self.end_pass_inner();
        self.guard(result)
    }

    fn end_pass_inner(&mut self) -> DeviceResult<()> {
        self.end_draw_threads(CommandState::Main)?;
        let buffer = self.main_buffer(QueueType::Graphics)?;
        self.api.cmd_end_render_pass(buffer)?;

        self.pass = None;
        self.subpass = 0;
        self.in_batch = false;
        self.shared.clear();
        self.viewports.clear();
        self.scissors.clear();
        self.pipeline_bits.remove(PipelineInfoBits::FRAMEBUFFER_INFO);
        self.run_pass(CommandPass::OnEndPass)?;
        Ok(())
    }

    pub fn begin_batch(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_none() {
            return Err(NO_PASS);
        }
        self.in_batch = true;
        Ok(())
    }

    /// Hand every lane's staged commands to its worker.
    pub fn end_batch(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        if !self.in_batch {
            return Err(DeviceError::InvalidState {
                expected: "batch open",
                actual: "no batch",
            });
        }
        self.draw.flush_all();
        self.in_batch = false;
        Ok(())
    }

    pub fn is_in_pass(&self) -> bool {
        self.pass.is_some()
    }

    pub fn is_in_batch(&self) -> bool {
        self.in_batch
    }

    pub fn subpass(&self) -> u32 {
        self.subpass
    }

    /// Viewports and scissors of the current subpass, capped at
    /// `max_viewports`. A subpass without any falls back to the render area.
    fn load_subpass_state(&mut self) {
        let Some(pass) = self.pass.as_ref() else {
            return;
        };
        let max = self.config.max_viewports;
        let subpass = pass.subpasses.get(self.subpass as usize);

        self.viewports = match subpass {
            Some(info) if !info.viewports.is_empty() => {
                info.viewports.iter().copied().take(max).collect()
            }
            _ => vec![Viewport::from_rect(pass.render_area)],
        };
        self.scissors = match subpass {
            Some(info) if !info.scissors.is_empty() => {
                info.scissors.iter().copied().take(max).collect()
            }
            _ => vec![pass.render_area],
        };
    }

    // --- Pipelines ---

    /// Set the shader half of the next graphics pipeline bind.
    pub fn set_graphics_pipeline(
        &mut self,
        pipeline: Pipeline,
        layout: PipelineLayout,
    ) -> DeviceResult<()> {
        self.check_recording()?;
        self.pending_pipeline = Some((pipeline, layout));
        self.pipeline_bits.insert(PipelineInfoBits::SHADER_INFO);
        self.pipeline_bits.remove(PipelineInfoBits::PIPELINE_BUILT);
        Ok(())
    }

    /// Bind the pending pipeline on the next draw lane.
    ///
    /// # Errors
    ///
    /// [`DeviceError::InvalidState`] unless both the shader info
    /// (`set_graphics_pipeline`) and the framebuffer info (`begin_pass`)
    /// are present.
    pub fn build_render_pipeline(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        let required = PipelineInfoBits::SHADER_INFO | PipelineInfoBits::FRAMEBUFFER_INFO;
        if !self.pipeline_bits.contains(required) {
            return Err(DeviceError::InvalidState {
                expected: "shader and framebuffer info",
                actual: "incomplete pipeline info",
            });
        }
        let result = self.create_and_bind_graphics_pipeline();
        self.guard(result)
    }

    fn create_and_bind_graphics_pipeline(&mut self) -> DeviceResult<()> {
        let (pipeline, layout) = self
            .pending_pipeline
            .ok_or_else(|| DeviceError::contract("no graphics pipeline set"))?;

        let index = self.draw.advance();
        if !self.draw.is_active(index) {
            self.begin_draw_thread_inner(index, true)?;
        }

        self.draw
            .push(index, Command::GraphicsPipeline { pipeline, layout }, true)?;
        if !self.viewports.is_empty() {
            let viewports = self.viewports.clone();
            self.draw.push(
                index,
                Command::ViewportArray {
                    first: 0,
                    viewports,
                },
                true,
            )?;
        }
        if !self.scissors.is_empty() {
            let rects = self.scissors.clone();
            self.draw
                .push(index, Command::ScissorArray { first: 0, rects }, true)?;
        }

        self.command_state = CommandState::Local;
        self.pipeline_bits.insert(PipelineInfoBits::PIPELINE_BUILT);
        self.frame_state = FrameState::RecordingThreads;
        self.stats.pipeline_binds += 1;
        log::trace!("Bound {} on draw lane {}", pipeline, index);

        self.run_pass(CommandPass::OnBindGraphicsPipeline)?;
        Ok(())
    }

    /// Drop the bound graphics pipeline; later state goes to the shared list.
    pub fn unbind_pipeline(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        self.clear_graphics_pipeline();
        self.command_state = if self.pass.is_some() {
            CommandState::Shared
        } else {
            CommandState::Main
        };
        Ok(())
    }

    fn clear_graphics_pipeline(&mut self) {
        self.pending_pipeline = None;
        self.pipeline_bits
            .remove(PipelineInfoBits::SHADER_INFO | PipelineInfoBits::PIPELINE_BUILT);
    }

    /// Bind a compute pipeline on the main graphics buffer.
    pub fn bind_compute_pipeline(
        &mut self,
        pipeline: Pipeline,
        layout: PipelineLayout,
    ) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_some() {
            return Err(DeviceError::InvalidState {
                expected: "no render pass",
                actual: "render pass open",
            });
        }
        let result = self.bind_compute_pipeline_inner(pipeline, layout);
        self.guard(result)
    }

    fn bind_compute_pipeline_inner(
        &mut self,
        pipeline: Pipeline,
        layout: PipelineLayout,
    ) -> DeviceResult<()> {
        self.main_mut(QueueType::Graphics)?
            .record(Command::ComputePipeline { pipeline, layout })?;
        self.compute_pipeline = Some((pipeline, layout));
        self.run_pass(CommandPass::OnBindComputePipeline)?;
        Ok(())
    }

    // --- Draw lanes ---

    /// Start lane `index` inside the current pass and replay shared state.
    fn begin_draw_thread_inner(&mut self, index: usize, run_pass: bool) -> DeviceResult<()> {
        let pass = self.pass.as_ref().ok_or(NO_PASS)?;
        let info = BeginInfo::render_pass_continue(InheritanceInfo {
            render_pass: Some(pass.render_pass),
            subpass: self.subpass,
            framebuffer: Some(pass.framebuffer),
        });
        let buffer = self.draw.begin_lane(index, &info)?;

        if !self.shared.is_empty() {
            log::debug!(
                "Replaying {} shared commands to draw lane {}",
                self.shared.len(),
                index
            );
            for command in &self.shared {
                self.draw.push(index, command.clone(), false)?;
            }
        }

        self.frame_state = FrameState::RecordingThreads;
        self.stats.draw_lanes += 1;
        log::trace!("Draw lane {} began {}", index, buffer);

        if run_pass {
            self.run_pass(CommandPass::OnBeginDrawThread)?;
        }
        Ok(())
    }

    /// Start every idle draw lane of the current pass.
    pub fn begin_draw_thread_cluster(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        if self.pass.is_none() {
            return Err(NO_PASS);
        }
        let result = self.begin_draw_thread_cluster_inner();
        self.guard(result)
    }

    fn begin_draw_thread_cluster_inner(&mut self) -> DeviceResult<()> {
        for index in 0..self.draw.len() {
            if !self.draw.is_active(index) {
                self.begin_draw_thread_inner(index, false)?;
            }
        }
        self.run_pass(CommandPass::OnBeginDrawThread)?;
        Ok(())
    }

    /// End every active draw lane and execute them into the pass.
    pub fn end_draw_thread_cluster(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        let next = if self.pass.is_some() {
            CommandState::Shared
        } else {
            CommandState::Main
        };
        let result = self.end_draw_threads(next);
        self.guard(result)
    }

    fn end_draw_threads(&mut self, next: CommandState) -> DeviceResult<()> {
        if self.draw.active() > 0 {
            self.end_lanes(QueueType::Graphics)?;
            self.run_pass(CommandPass::OnDrawThreadsSubmitted)?;
        }
        self.clear_graphics_pipeline();
        self.command_state = next;
        Ok(())
    }

    /// Move the cursor to the next draw lane, starting it if it is idle.
    pub fn next_thread(&mut self) -> DeviceResult<usize> {
        self.check_recording()?;
        let index = self.draw.advance();
        if self.draw.is_active(index) || self.pass.is_none() {
            return Ok(index);
        }
        let result = self.begin_draw_thread_inner(index, true).map(|()| index);
        self.guard(result)
    }

    pub fn current_thread(&self) -> usize {
        self.draw.current()
    }

    /// Queue a command on draw lane `index`.
    pub fn push_to_thread(
        &mut self,
        command: Command,
        index: usize,
        allow_staging: bool,
    ) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self.draw.push(index, command, allow_staging);
        self.guard(result)
    }

    pub fn flush_to_thread(&mut self, index: usize) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self.draw.flush(index);
        self.guard(result)
    }

    // --- Compute and transfer lanes ---

    /// Start every compute lane; they record outside any render pass.
    pub fn begin_compute_threads(&mut self) -> DeviceResult<()> {
        self.begin_side_lanes(QueueType::Compute)
    }

    pub fn end_compute_threads(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self.end_side_lanes(QueueType::Compute);
        self.guard(result)
    }

    /// Start every transfer lane.
    pub fn begin_transfer_threads(&mut self) -> DeviceResult<()> {
        self.begin_side_lanes(QueueType::Transfer)
    }

    pub fn end_transfer_threads(&mut self) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self.end_side_lanes(QueueType::Transfer);
        self.guard(result)
    }

    /// Queue a command on lane `index` of the queue's cluster.
    pub fn push_to_lane(
        &mut self,
        queue: QueueType,
        index: usize,
        command: Command,
    ) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self
            .cluster_mut(queue)
            .and_then(|cluster| cluster.push(index, command, true));
        self.guard(result)
    }

    fn begin_side_lanes(&mut self, queue: QueueType) -> DeviceResult<()> {
        self.check_recording()?;
        let result = self.begin_side_lanes_inner(queue);
        self.guard(result)
    }

    fn begin_side_lanes_inner(&mut self, queue: QueueType) -> DeviceResult<()> {
        self.main_buffer(queue)?;
        let info = BeginInfo::secondary_outside_pass();
        let cluster = self.cluster_mut(queue)?;
        for index in 0..cluster.len() {
            if !cluster.is_active(index) {
                cluster.begin_lane(index, &info)?;
            }
        }
        self.frame_state = FrameState::RecordingThreads;
        Ok(())
    }

    pub(super) fn end_side_lanes(&mut self, queue: QueueType) -> DeviceResult<()> {
        if self.cluster_mut(queue)?.active() == 0 {
            return Ok(());
        }
        self.end_lanes(queue)
    }

    /// End the queue's lanes, execute them into its main buffer in lane
    /// order and defer freeing them to the queue's fence pass.
    ///
    /// The frees run while every lane is idle (a later begin_frame or
    /// close), so the lane pools are never touched from two threads.
    fn end_lanes(&mut self, queue: QueueType) -> DeviceResult<()> {
        let output = self.cluster_mut(queue)?.end_all();
        if let Some(fault) = output.fault {
            free_lane_buffers(&*self.api, &output.buffers);
            return Err(fault);
        }

        let executed = self
            .main_buffer(queue)
            .and_then(|main| self.api.cmd_execute_commands(main, &output.command_buffers()));
        if let Err(e) = executed {
            free_lane_buffers(&*self.api, &output.buffers);
            return Err(e);
        }

        for lane in &output.buffers {
            self.scheduler
                .push_free_command_buffers(queue, lane.pool, vec![lane.buffer]);
        }
        self.frame_state = FrameState::ThreadsSubmitted;
        log::trace!(
            "Executed {} {} lanes into the main buffer",
            output.buffers.len(),
            queue
        );
        Ok(())
    }

    fn cluster_mut(&mut self, queue: QueueType) -> DeviceResult<&mut ThreadCluster> {
        match queue {
            QueueType::Graphics => Ok(&mut self.draw),
            QueueType::Compute => Ok(&mut self.compute),
            QueueType::Transfer => Ok(&mut self.transfer),
            QueueType::Sparse => Err(DeviceError::contract("sparse queue has no recording lanes")),
        }
    }
}
