//! The render device.
//!
//! [`RenderDevice`] owns the recording lanes, the per-queue main command
//! buffers and the [`Scheduler`], and is the only place command buffers are
//! handed to a queue.
//!
//! # Frame structure
//!
//! ```text
//! begin_frame
//!   ├─ begin main buffers (graphics, compute, transfer)
//!   ├─ poll OnHandle{Transfer,Draw,Compute,Sparse}Fences
//!   └─ OnBeginFrame
//!     begin_pass ── BeginRenderPass on main graphics, OnBeginPass
//!       set_graphics_pipeline + build_render_pipeline
//!         └─ next lane (started + shared state replayed if idle),
//!            bind pipeline, viewports, scissors, OnBindGraphicsPipeline
//!       draw / draw_indexed_instanced / ...   ── current lane
//!     end_pass ── lanes ended in index order, ExecuteCommands, OnEndPass
//! end_frame
//!   ├─ per queue (transfer, compute, sparse, graphics):
//!   │    end + submit main buffer with its fence, OnMain*Submitted, end_queue
//!   ├─ wait main fences, reset them and the main buffers
//!   └─ OnEndFrame
//! ```
//!
//! # Errors
//!
//! Any [`DeviceError`] raised inside a frame aborts it: later recording calls
//! return [`DeviceError::FrameAborted`] and `end_frame` throws the frame's
//! work away instead of submitting it. The next `begin_frame` clears the
//! abort. [`DeviceError::DeviceLost`] latches for good.

mod lanes;
mod recording;
mod state;
mod target;

pub use state::{CommandState, FrameState, FrameStats, PipelineInfoBits};

use std::sync::Arc;

use crate::backend::GpuApi;
use crate::command::Command;
use crate::config::DeviceConfig;
use crate::deferred::{DeferredCommand, RecordContext};
use crate::error::{DeviceError, DeviceResult};
use crate::scheduler::{CommandPass, Scheduler};
use crate::types::{
    BeginInfo, Buffer, ClearColor, ClearDepthStencil, CommandBuffer, Event, Fence, Image,
    ImageInfo, ImageLayout, Memory, PassInfo, Pipeline, PipelineLayout, PipelineStages, QueueType,
    Rect2D, SubmitBatch, SubresourceRange, Viewport,
};
use crate::worker::{LaneBuffer, ThreadCluster};

use state::MainQueue;
use target::DeviceTarget;

/// Queues in the order `end_frame` submits them.
const SUBMIT_ORDER: [QueueType; QueueType::COUNT] = [
    QueueType::Transfer,
    QueueType::Compute,
    QueueType::Sparse,
    QueueType::Graphics,
];

/// Queues that get a main command buffer. Sparse binding records nothing.
const MAIN_QUEUES: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

/// Multi-threaded command recording over a [`GpuApi`].
pub struct RenderDevice {
    api: Arc<dyn GpuApi>,
    config: DeviceConfig,
    scheduler: Scheduler,
    draw: ThreadCluster,
    compute: ThreadCluster,
    transfer: ThreadCluster,
    main: [Option<MainQueue>; QueueType::COUNT],
    events: Vec<Event>,

    frame_state: FrameState,
    command_state: CommandState,
    pipeline_bits: PipelineInfoBits,
    in_frame: bool,
    frame_index: u64,
    stats: FrameStats,

    pass: Option<PassInfo>,
    subpass: u32,
    in_batch: bool,
    viewports: Vec<Viewport>,
    scissors: Vec<Rect2D>,
    /// State replayed to every draw lane started later in the pass.
    shared: Vec<Command>,
    pending_pipeline: Option<(Pipeline, PipelineLayout)>,
    compute_pipeline: Option<(Pipeline, PipelineLayout)>,

    aborted: Option<String>,
    device_lost: bool,
    closed: bool,
}

impl RenderDevice {
    /// Spawn every lane and create the main command buffers.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Config`] for an invalid configuration, or the
    /// API error that stopped creation. Anything created before the failure
    /// is released again.
    pub fn open(api: Arc<dyn GpuApi>, config: DeviceConfig) -> DeviceResult<Self> {
        config.validate()?;
        log::info!(
            "Opening render device on {}: {} draw, {} compute, {} transfer lanes",
            api.name(),
            config.draw_threads,
            config.compute_threads,
            config.transfer_threads
        );

        let mut clusters = Vec::with_capacity(3);
        for (queue, count) in [
            (QueueType::Graphics, config.draw_threads),
            (QueueType::Compute, config.compute_threads),
            (QueueType::Transfer, config.transfer_threads),
        ] {
            match ThreadCluster::new(
                Arc::clone(&api),
                queue,
                count,
                config.staging_flush_threshold,
                &config.worker_name_prefix,
            ) {
                Ok(cluster) => clusters.push(cluster),
                Err(e) => {
                    shutdown_clusters(&mut clusters);
                    return Err(e);
                }
            }
        }

        let mut main: [Option<MainQueue>; QueueType::COUNT] = [None, None, None, None];
        for queue in MAIN_QUEUES {
            match MainQueue::create(&api, queue) {
                Ok(created) => main[queue.index()] = Some(created),
                Err(e) => {
                    for created in main.iter_mut().filter_map(Option::take) {
                        let queue = created.queue;
                        if let Err(cleanup) = created.destroy(&*api) {
                            log::error!("Failed to destroy {} main queue: {}", queue, cleanup);
                        }
                    }
                    shutdown_clusters(&mut clusters);
                    return Err(e);
                }
            }
        }

        let mut clusters = clusters.into_iter();
        let (Some(draw), Some(compute), Some(transfer)) =
            (clusters.next(), clusters.next(), clusters.next())
        else {
            return Err(DeviceError::contract("lane clusters missing after creation"));
        };

        Ok(Self {
            scheduler: Scheduler::new(Arc::clone(&api)),
            api,
            draw,
            compute,
            transfer,
            main,
            events: Vec::new(),
            frame_state: FrameState::Idle,
            command_state: CommandState::Main,
            pipeline_bits: PipelineInfoBits::empty(),
            in_frame: false,
            frame_index: 0,
            stats: FrameStats::default(),
            pass: None,
            subpass: 0,
            in_batch: false,
            viewports: Vec::with_capacity(config.max_viewports),
            scissors: Vec::with_capacity(config.max_viewports),
            shared: Vec::new(),
            pending_pipeline: None,
            compute_pipeline: None,
            aborted: None,
            device_lost: false,
            closed: false,
            config,
        })
    }

    /// Tear the device down.
    ///
    /// Waits for every outstanding deferred fence, discards the scheduler,
    /// stops and joins every worker, then destroys the main buffers, pools,
    /// fences and events. Keeps going after failures and returns the first.
    pub fn close(&mut self) -> DeviceResult<()> {
        if self.closed {
            return Ok(());
        }
        log::info!("Closing render device");

        let mut first_error = None;
        if self.in_frame {
            log::warn!("Closing render device inside frame {}", self.frame_index);
            self.abandon_frame();
        }

        let fences = self.scheduler.outstanding_fence_handles();
        if !fences.is_empty() && !self.device_lost {
            match self
                .api
                .wait_for_fences(&fences, true, self.config.fence_timeout())
            {
                Ok(true) => {}
                Ok(false) => log::warn!(
                    "Timed out waiting for {} deferred fences at close",
                    fences.len()
                ),
                Err(e) => keep_first(&mut first_error, "wait for deferred fences", Err(e)),
            }
        }

        let mut target = DeviceTarget {
            ctx: RecordContext {
                api: &*self.api,
                main: [None; QueueType::COUNT],
                chunk_size: self.config.update_chunk_size,
            },
            draw: &mut self.draw,
            teardown: true,
        };
        let discarded = self.scheduler.discard(&mut target).map(|_| ());
        keep_first(&mut first_error, "discard scheduler", discarded);

        for cluster in [&mut self.draw, &mut self.compute, &mut self.transfer] {
            let queue = cluster.queue();
            keep_first(&mut first_error, queue.name(), cluster.shutdown());
        }
        for main in self.main.iter_mut().filter_map(Option::take) {
            let queue = main.queue;
            keep_first(&mut first_error, queue.name(), main.destroy(&*self.api));
        }
        for event in self.events.drain(..) {
            keep_first(&mut first_error, "destroy event", self.api.destroy_event(event));
        }

        self.closed = true;
        self.frame_state = FrameState::Idle;
        first_error.map_or(Ok(()), Err)
    }

    pub fn api(&self) -> &Arc<dyn GpuApi> {
        &self.api
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    pub fn command_state(&self) -> CommandState {
        self.command_state
    }

    pub fn pipeline_bits(&self) -> PipelineInfoBits {
        self.pipeline_bits
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Counters of the current (or last) frame.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn is_frame_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn draw_lanes(&self) -> &ThreadCluster {
        &self.draw
    }

    pub fn compute_lanes(&self) -> &ThreadCluster {
        &self.compute
    }

    pub fn transfer_lanes(&self) -> &ThreadCluster {
        &self.transfer
    }

    /// The queue's primary command buffer, while it is recording.
    pub fn main_command_buffer(&self, queue: QueueType) -> Option<CommandBuffer> {
        self.main[queue.index()].as_ref().and_then(MainQueue::recording)
    }

    /// The fence the queue's main submission signals.
    pub fn main_fence(&self, queue: QueueType) -> Option<Fence> {
        self.main[queue.index()].as_ref().map(|main| main.fence)
    }

    // --- Frame lifecycle ---

    /// Start frame `frame_index`.
    ///
    /// Begins the main buffers, drains every deferred fence that has
    /// signaled since the last frame and runs `OnBeginFrame`.
    pub fn begin_frame(&mut self, frame_index: u64) -> DeviceResult<()> {
        self.check_open()?;
        if self.in_frame {
            return Err(DeviceError::InvalidState {
                expected: "no frame in progress",
                actual: "frame in progress",
            });
        }
        lilium_core::profile_scope!("begin_frame");

        self.in_frame = true;
        self.frame_index = frame_index;
        self.aborted = None;
        self.stats = FrameStats::new(frame_index);
        self.reset_frame_cursor();

        let result = self.begin_frame_inner();
        self.guard(result)
    }

    fn begin_frame_inner(&mut self) -> DeviceResult<()> {
        for main in self.main.iter_mut().flatten() {
            main.record(Command::Begin {
                buffer: main.buffer,
                info: BeginInfo::one_time(),
            })?;
        }

        self.scheduler.begin();
        for queue in SUBMIT_ORDER {
            self.run_pass(CommandPass::handle_fences(queue))?;
        }
        self.run_pass(CommandPass::OnBeginFrame)?;

        self.refresh_frame_state();
        log::trace!(
            "Frame {} began, {} deferred fences outstanding",
            self.frame_index,
            self.scheduler.total_outstanding_fences()
        );
        Ok(())
    }

    /// Submit the frame.
    ///
    /// Open compute and transfer lanes are ended first. A render pass must
    /// already be closed. An aborted frame is thrown away instead and
    /// reported as [`DeviceError::FrameAborted`].
    pub fn end_frame(&mut self) -> DeviceResult<()> {
        self.check_open()?;
        if !self.in_frame {
            return Err(DeviceError::InvalidState {
                expected: "frame in progress",
                actual: "no frame in progress",
            });
        }
        if let Some(reason) = self.aborted.clone() {
            log::error!("Frame {} aborted, dropping its work", self.frame_index);
            self.abandon_frame();
            return Err(DeviceError::FrameAborted { reason });
        }
        if self.pass.is_some() {
            return Err(DeviceError::InvalidState {
                expected: "render pass ended",
                actual: "render pass open",
            });
        }
        lilium_core::profile_scope!("end_frame");

        let result = self.end_frame_inner();
        if let Err(e) = &result {
            self.fail(e);
            self.abandon_frame();
        } else {
            self.in_frame = false;
            lilium_core::frame_mark!();
        }
        result
    }

    fn end_frame_inner(&mut self) -> DeviceResult<()> {
        self.end_side_lanes(QueueType::Compute)?;
        self.end_side_lanes(QueueType::Transfer)?;

        for queue in SUBMIT_ORDER {
            self.submit_main(queue)?;
            self.run_pass(CommandPass::main_submitted(queue))?;
            self.scheduler.end_queue(queue)?;
        }
        self.frame_state = FrameState::ThreadsSubmitted;

        let fences = self.submitted_main_fences();
        self.wait_for_fences(&fences, true)?;
        self.api.reset_fences(&fences)?;
        for main in self.main.iter_mut().flatten() {
            main.reset(&*self.api)?;
        }

        self.run_pass(CommandPass::OnEndFrame)?;
        self.refresh_frame_state();
        lilium_core::profile_plot!(
            "deferred fences",
            self.scheduler.total_outstanding_fences() as f64
        );
        log::trace!(
            "Frame {} submitted: {} submissions, {} draw lanes, {} deferred commands",
            self.frame_index,
            self.stats.submissions,
            self.stats.draw_lanes,
            self.stats.deferred_executed
        );
        Ok(())
    }

    fn submit_main(&mut self, queue: QueueType) -> DeviceResult<()> {
        let Some(main) = self.main[queue.index()].as_mut() else {
            return Ok(());
        };
        if main.recording().is_none() {
            return Ok(());
        }
        main.record(Command::End)?;
        let (buffer, fence) = (main.buffer, main.fence);
        self.submit(
            queue,
            &[SubmitBatch {
                wait_stages: PipelineStages::ALL_COMMANDS,
                command_buffers: vec![buffer],
            }],
            Some(fence),
        )?;
        if let Some(main) = self.main[queue.index()].as_mut() {
            main.submitted = true;
        }
        Ok(())
    }

    fn submitted_main_fences(&self) -> Vec<Fence> {
        self.main
            .iter()
            .flatten()
            .filter(|main| main.submitted)
            .map(|main| main.fence)
            .collect()
    }

    /// Throw the frame's work away and leave the device between frames.
    fn abandon_frame(&mut self) {
        for cluster in [&mut self.draw, &mut self.compute, &mut self.transfer] {
            if cluster.active() > 0 {
                let output = cluster.end_all();
                free_lane_buffers(&*self.api, &output.buffers);
            }
        }
        // Main buffers already handed to a queue must retire before reuse.
        let fences = self.submitted_main_fences();
        if !fences.is_empty() {
            let waited = self
                .wait_for_fences(&fences, true)
                .and_then(|()| self.api.reset_fences(&fences));
            if let Err(e) = waited {
                log::debug!("Failed to retire main fences of an abandoned frame: {}", e);
            }
        }
        for main in self.main.iter_mut().flatten() {
            if let Err(e) = main.reset(&*self.api) {
                log::debug!("Failed to reset {} main buffer: {}", main.queue, e);
            }
        }
        self.pass = None;
        self.in_batch = false;
        self.shared.clear();
        self.pending_pipeline = None;
        self.compute_pipeline = None;
        self.pipeline_bits = PipelineInfoBits::empty();
        self.command_state = CommandState::Main;
        self.in_frame = false;
        self.refresh_frame_state();
    }

    fn reset_frame_cursor(&mut self) {
        self.draw.reset_cursor();
        self.compute.reset_cursor();
        self.transfer.reset_cursor();
        self.command_state = CommandState::Main;
        self.pipeline_bits = PipelineInfoBits::empty();
        self.pending_pipeline = None;
        self.compute_pipeline = None;
    }

    fn refresh_frame_state(&mut self) {
        self.frame_state = if self.scheduler.total_outstanding_fences() > 0 {
            FrameState::FencesPending
        } else {
            FrameState::Idle
        };
    }

    // --- Submission and fences ---

    /// Submit command buffers to `queue`, waiting at `stages`.
    ///
    /// Every barrier the buffers need must already be recorded into them.
    pub fn submit_to_queue(
        &mut self,
        queue: QueueType,
        stages: PipelineStages,
        buffers: &[CommandBuffer],
    ) -> DeviceResult<()> {
        self.check_open()?;
        let batch = SubmitBatch {
            wait_stages: stages,
            command_buffers: buffers.to_vec(),
        };
        let result = self.submit(queue, &[batch], None);
        self.guard(result)
    }

    /// Signal `fence` once everything submitted to `queue` so far retires.
    pub fn submit_fence(&mut self, queue: QueueType, fence: Fence) -> DeviceResult<()> {
        self.check_open()?;
        let result = self.submit(queue, &[], Some(fence));
        self.guard(result)
    }

    fn submit(
        &mut self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<Fence>,
    ) -> DeviceResult<()> {
        self.api.queue_submit(queue, batches, fence)?;
        if !batches.is_empty() {
            self.stats.submissions += 1;
            self.frame_state = FrameState::ThreadsSubmitted;
        }
        log::trace!(
            "Submitted {} batches to {} queue (fence {:?})",
            batches.len(),
            queue,
            fence
        );
        Ok(())
    }

    /// Block until the fences signal, up to the configured timeout.
    ///
    /// # Errors
    ///
    /// [`DeviceError::FenceTimeout`] when the timeout elapses first.
    pub fn wait_for_fences(&self, fences: &[Fence], wait_all: bool) -> DeviceResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        let timeout = self.config.fence_timeout();
        if self.api.wait_for_fences(fences, wait_all, timeout)? {
            Ok(())
        } else {
            log::error!("Timed out waiting for {} fences", fences.len());
            Err(DeviceError::FenceTimeout {
                timeout_ms: self.config.fence_timeout_ms,
            })
        }
    }

    pub fn create_event(&mut self) -> DeviceResult<Event> {
        self.check_open()?;
        let event = self.api.create_event()?;
        self.events.push(event);
        Ok(event)
    }

    pub fn destroy_event(&mut self, event: Event) -> DeviceResult<()> {
        self.check_open()?;
        let Some(position) = self.events.iter().position(|e| *e == event) else {
            return Err(DeviceError::invalid_handle(Event::KIND, event));
        };
        self.api.destroy_event(event)?;
        self.events.swap_remove(position);
        Ok(())
    }

    // --- Deferred work ---

    pub fn push_deferred(&mut self, command: DeferredCommand, pass: CommandPass) {
        self.scheduler.push_command(command, pass);
    }

    pub fn push_image_layout_transition(
        &mut self,
        queue: QueueType,
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: SubresourceRange,
    ) {
        self.scheduler
            .push_image_layout_transition(queue, image, old_layout, new_layout, range);
    }

    pub fn push_image_ownership_change(
        &mut self,
        image: Image,
        layout: ImageLayout,
        from: QueueType,
        to: QueueType,
        range: SubresourceRange,
    ) {
        self.scheduler
            .push_image_ownership_change(image, layout, from, to, range);
    }

    pub fn push_image_color_clear(
        &mut self,
        queue: QueueType,
        image: Image,
        layout: ImageLayout,
        value: ClearColor,
        range: SubresourceRange,
    ) {
        self.scheduler
            .push_image_color_clear(queue, image, layout, value, range);
    }

    pub fn push_image_depth_stencil_clear(
        &mut self,
        queue: QueueType,
        image: Image,
        layout: ImageLayout,
        value: ClearDepthStencil,
        range: SubresourceRange,
    ) {
        self.scheduler
            .push_image_depth_stencil_clear(queue, image, layout, value, range);
    }

    pub fn push_image_update(
        &mut self,
        image: Image,
        info: ImageInfo,
        mip: u32,
        face: u32,
        data: &[u8],
    ) {
        self.scheduler.push_image_update(image, info, mip, face, data);
    }

    pub fn push_buffer_update(&mut self, queue: QueueType, buffer: Buffer, offset: u64, data: &[u8]) {
        self.scheduler.push_buffer_update(queue, buffer, offset, data);
    }

    pub fn push_free_buffer(&mut self, queue: QueueType, buffer: Buffer, memory: Option<Memory>) {
        self.scheduler.push_free_buffer(queue, buffer, memory);
    }

    pub fn push_free_image(&mut self, queue: QueueType, image: Image, memory: Option<Memory>) {
        self.scheduler.push_free_image(queue, image, memory);
    }

    pub fn push_destroy_pipeline(&mut self, queue: QueueType, pipeline: Pipeline) {
        self.scheduler.push_destroy_pipeline(queue, pipeline);
    }

    // --- Internals ---

    fn run_pass(&mut self, pass: CommandPass) -> DeviceResult<usize> {
        let mut main = [None; QueueType::COUNT];
        for (slot, queue) in main.iter_mut().zip(&self.main) {
            *slot = queue.as_ref().and_then(MainQueue::recording);
        }
        let mut target = DeviceTarget {
            ctx: RecordContext {
                api: &*self.api,
                main,
                chunk_size: self.config.update_chunk_size,
            },
            draw: &mut self.draw,
            teardown: false,
        };
        let executed = self.scheduler.execute_command_pass(pass, &mut target)?;
        self.stats.deferred_executed += executed;
        Ok(executed)
    }

    fn main_mut(&mut self, queue: QueueType) -> DeviceResult<&mut MainQueue> {
        self.main[queue.index()].as_mut().ok_or_else(|| {
            DeviceError::contract(format!("{queue} queue has no main command buffer"))
        })
    }

    fn main_buffer(&self, queue: QueueType) -> DeviceResult<CommandBuffer> {
        self.main[queue.index()]
            .as_ref()
            .ok_or_else(|| {
                DeviceError::contract(format!("{queue} queue has no main command buffer"))
            })?
            .require()
    }

    fn check_open(&self) -> DeviceResult<()> {
        if self.closed {
            return Err(DeviceError::InvalidState {
                expected: "open device",
                actual: "closed device",
            });
        }
        if self.device_lost {
            return Err(DeviceError::DeviceLost);
        }
        Ok(())
    }

    fn check_recording(&self) -> DeviceResult<()> {
        self.check_open()?;
        if !self.in_frame {
            return Err(DeviceError::InvalidState {
                expected: "frame in progress",
                actual: "no frame in progress",
            });
        }
        if let Some(reason) = &self.aborted {
            return Err(DeviceError::FrameAborted {
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: DeviceResult<T>) -> DeviceResult<T> {
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn fail(&mut self, error: &DeviceError) {
        if error.is_device_lost() && !self.device_lost {
            log::error!("Device lost: {}", error);
            self.device_lost = true;
        }
        if self.in_frame && self.aborted.is_none() {
            log::error!("Aborting frame {}: {}", self.frame_index, error);
            self.aborted = Some(error.to_string());
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close render device: {}", e);
        }
    }
}

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("backend", &self.api.name())
            .field("frame_index", &self.frame_index)
            .field("frame_state", &self.frame_state)
            .field("command_state", &self.command_state)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

fn keep_first(slot: &mut Option<DeviceError>, what: &str, result: DeviceResult<()>) {
    if let Err(e) = result {
        log::error!("Close: {} failed: {}", what, e);
        slot.get_or_insert(e);
    }
}

fn shutdown_clusters(clusters: &mut [ThreadCluster]) {
    for cluster in clusters {
        if let Err(e) = cluster.shutdown() {
            log::error!("Failed to shut down {} lanes: {}", cluster.queue(), e);
        }
    }
}

/// Free lane buffers the GPU never saw.
fn free_lane_buffers(api: &dyn GpuApi, buffers: &[LaneBuffer]) {
    for lane in buffers {
        if let Err(e) = api.free_command_buffers(lane.pool, &[lane.buffer]) {
            log::debug!("Failed to free lane {} buffer: {}", lane.lane, e);
        }
    }
}
