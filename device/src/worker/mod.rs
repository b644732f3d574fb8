//! Recording workers.
//!
//! A [`CommandWorker`] owns one OS thread and one queue of [`Command`]s. The
//! frame thread appends commands; the worker wakes, moves the whole pending
//! list out under the lock, releases the lock and translates the batch into
//! GPU API calls on the command buffer bound to it:
//!
//! ```text
//!  frame thread                 worker thread
//!  ────────────                 ─────────────
//!  push_command(Begin) ──┐
//!  push_command(Draw)  ──┼──►  [queue] ──swap──► batch ──► Recorder::execute
//!  push_command(Sync)  ──┘                                   │
//!  completion.wait() ◄──────────────── signal ◄──────────────┘
//! ```
//!
//! Commands pushed to one worker are translated in exactly the order they were
//! pushed. Nothing is ordered across workers.
//!
//! # Faults
//!
//! When a translation fails the [`Recorder`] keeps the first error, drops every
//! later command until the next [`Command::Begin`], and still signals every
//! [`Command::Sync`] so the frame thread never blocks on a dead lane. The error
//! is collected with [`CommandWorker::take_fault`].
//!
//! # Shutdown
//!
//! The stop flag lives under the same lock as the queue, so the worker waits
//! on a single predicate ("work queued or stop requested") and can never miss
//! a wakeup. A stopping worker drains what is queued before it exits.

mod cluster;
mod event;

use std::sync::Arc;
use std::thread::JoinHandle;

use lilium_core::{profile_scope, set_thread_name};
use parking_lot::{Condvar, Mutex};

use crate::backend::GpuApi;
use crate::command::Command;
use crate::error::DeviceError;
use crate::types::{BindPoint, CommandBuffer, PipelineLayout, StencilFaces};

pub use cluster::{ClusterOutput, LaneBuffer, ThreadCluster};
pub use event::CompletionEvent;

/// Translates [`Command`]s into API calls on the command buffer bound to it.
pub struct Recorder {
    api: Arc<dyn GpuApi>,
    name: String,
    buffer: Option<CommandBuffer>,
    layout: Option<PipelineLayout>,
    recording: bool,
    faulted: bool,
    fault: Option<DeviceError>,
    translated: u64,
}

impl Recorder {
    pub fn new(api: Arc<dyn GpuApi>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
            buffer: None,
            layout: None,
            recording: false,
            faulted: false,
            fault: None,
            translated: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_buffer(&self) -> Option<CommandBuffer> {
        self.buffer
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Commands successfully translated so far.
    pub fn translated(&self) -> u64 {
        self.translated
    }

    /// Bind a command buffer without beginning it.
    ///
    /// Only valid while nothing is being recorded.
    pub fn set_command_buffer(&mut self, buffer: CommandBuffer) -> Result<(), DeviceError> {
        if self.recording {
            return Err(DeviceError::contract(format!(
                "{}: cannot rebind while recording {}",
                self.name,
                self.buffer.unwrap_or(CommandBuffer::NULL)
            )));
        }
        self.buffer = Some(buffer);
        Ok(())
    }

    /// The first translation error since the last call, if any.
    pub fn take_fault(&mut self) -> Option<DeviceError> {
        self.fault.take()
    }

    /// Forget the bound buffer, its layout and any latched fault.
    ///
    /// For after the owner reset the buffer behind the recorder's back.
    pub fn clear(&mut self) {
        self.buffer = None;
        self.layout = None;
        self.recording = false;
        self.faulted = false;
        self.fault = None;
    }

    /// Translate one command and report its failure directly.
    pub fn record(&mut self, command: Command) -> Result<(), DeviceError> {
        self.execute(command);
        self.take_fault().map_or(Ok(()), Err)
    }

    /// Translate every command in `batch` in order, leaving it empty.
    pub fn execute_batch(&mut self, batch: &mut Vec<Command>) {
        for command in batch.drain(..) {
            self.execute(command);
        }
    }

    /// Translate one command, latching the first failure.
    pub fn execute(&mut self, command: Command) {
        if let Command::Sync(event) = &command {
            event.signal();
            return;
        }
        if self.faulted {
            if !matches!(command, Command::Begin { .. }) {
                log::trace!("{}: dropping {:?} after fault", self.name, command.kind());
                return;
            }
            self.faulted = false;
        }

        let kind = command.kind();
        match self.translate(command) {
            Ok(()) => self.translated += 1,
            Err(error) => {
                log::error!("{}: {:?} failed: {}", self.name, kind, error);
                self.faulted = true;
                self.recording = false;
                self.buffer = None;
                self.layout = None;
                if self.fault.is_none() {
                    self.fault = Some(error);
                }
            }
        }
    }

    fn bound(&self) -> Result<CommandBuffer, DeviceError> {
        self.buffer
            .ok_or_else(|| DeviceError::contract(format!("{}: no command buffer bound", self.name)))
    }

    fn resolve_layout(
        &self,
        layout: Option<PipelineLayout>,
    ) -> Result<PipelineLayout, DeviceError> {
        layout.or(self.layout).ok_or_else(|| {
            DeviceError::contract(format!("{}: no pipeline layout bound", self.name))
        })
    }

    fn translate(&mut self, command: Command) -> Result<(), DeviceError> {
        let api = &*self.api;
        match command {
            Command::Begin { buffer, info } => {
                if self.recording {
                    return Err(DeviceError::contract(format!(
                        "{}: Begin while {} is still recording",
                        self.name,
                        self.buffer.unwrap_or(CommandBuffer::NULL)
                    )));
                }
                api.begin_command_buffer(buffer, &info)?;
                self.buffer = Some(buffer);
                self.layout = None;
                self.recording = true;
            }
            Command::Reset => {
                api.reset_command_buffer(self.bound()?)?;
                self.recording = false;
            }
            Command::End => {
                api.end_command_buffer(self.bound()?)?;
                self.buffer = None;
                self.layout = None;
                self.recording = false;
            }
            Command::GraphicsPipeline { pipeline, layout } => {
                api.cmd_bind_pipeline(self.bound()?, BindPoint::Graphics, pipeline)?;
                self.layout = Some(layout);
            }
            Command::ComputePipeline { pipeline, layout } => {
                api.cmd_bind_pipeline(self.bound()?, BindPoint::Compute, pipeline)?;
                self.layout = Some(layout);
            }
            Command::VertexBuffer {
                slot,
                buffer,
                offset,
            } => api.cmd_bind_vertex_buffer(self.bound()?, slot, buffer, offset)?,
            Command::IndexBuffer {
                buffer,
                offset,
                index_type,
            } => api.cmd_bind_index_buffer(self.bound()?, buffer, offset, index_type)?,
            Command::Draw(args) => {
                let cmd = self.bound()?;
                if args.is_indexed() {
                    api.cmd_draw_indexed(
                        cmd,
                        args.num_indices,
                        args.num_instances,
                        args.base_index,
                        args.base_vertex,
                        args.base_instance,
                    )?;
                } else {
                    let first_vertex = u32::try_from(args.base_vertex).map_err(|_| {
                        DeviceError::contract(format!(
                            "non-indexed draw with negative base vertex {}",
                            args.base_vertex
                        ))
                    })?;
                    api.cmd_draw(
                        cmd,
                        args.num_vertices,
                        args.num_instances,
                        first_vertex,
                        args.base_instance,
                    )?;
                }
            }
            Command::IndirectDraw(args) => api.cmd_draw_indirect(
                self.bound()?,
                args.buffer,
                args.offset,
                args.draw_count,
                args.stride,
            )?,
            Command::IndirectIndexedDraw(args) => api.cmd_draw_indexed_indirect(
                self.bound()?,
                args.buffer,
                args.offset,
                args.draw_count,
                args.stride,
            )?,
            Command::Dispatch { x, y, z } => api.cmd_dispatch(self.bound()?, x, y, z)?,
            Command::BindDescriptors {
                bind_point,
                layout,
                first_set,
                sets,
                offsets,
            } => {
                let layout = self.resolve_layout(layout)?;
                api.cmd_bind_descriptor_sets(
                    self.bound()?,
                    bind_point,
                    layout,
                    first_set,
                    &sets,
                    &offsets,
                )?;
            }
            Command::PushConstants {
                stages,
                layout,
                offset,
                data,
            } => {
                let layout = self.resolve_layout(layout)?;
                api.cmd_push_constants(self.bound()?, layout, stages, offset, &data)?;
            }
            Command::Viewport { index, viewport } => {
                api.cmd_set_viewports(self.bound()?, index, &[viewport])?
            }
            Command::ViewportArray { first, viewports } => {
                api.cmd_set_viewports(self.bound()?, first, &viewports)?
            }
            Command::Scissor { index, rect } => api.cmd_set_scissors(self.bound()?, index, &[rect])?,
            Command::ScissorArray { first, rects } => {
                api.cmd_set_scissors(self.bound()?, first, &rects)?
            }
            Command::StencilRefs { front, back } => {
                let cmd = self.bound()?;
                api.cmd_set_stencil_reference(cmd, StencilFaces::FRONT, front)?;
                api.cmd_set_stencil_reference(cmd, StencilFaces::BACK, back)?;
            }
            Command::StencilReadMask(mask) => {
                api.cmd_set_stencil_compare_mask(self.bound()?, StencilFaces::FRONT_AND_BACK, mask)?
            }
            Command::StencilWriteMask(mask) => {
                api.cmd_set_stencil_write_mask(self.bound()?, StencilFaces::FRONT_AND_BACK, mask)?
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => api.cmd_update_buffer(self.bound()?, buffer, offset, &data)?,
            Command::SetEvent { event, stages } => api.cmd_set_event(self.bound()?, event, stages)?,
            Command::ResetEvent { event, stages } => {
                api.cmd_reset_event(self.bound()?, event, stages)?
            }
            Command::WaitForEvent { event, barrier } => {
                api.cmd_wait_events(self.bound()?, &[event], &barrier)?
            }
            Command::Barrier(barrier) => api.cmd_pipeline_barrier(self.bound()?, &barrier)?,
            Command::Timestamp { pool, index, stage } => {
                api.cmd_write_timestamp(self.bound()?, stage, pool, index)?
            }
            Command::BeginQuery {
                pool,
                index,
                precise,
            } => api.cmd_begin_query(self.bound()?, pool, index, precise)?,
            Command::EndQuery { pool, index } => api.cmd_end_query(self.bound()?, pool, index)?,
            Command::BeginMarker { label, color } => {
                api.cmd_begin_label(self.bound()?, &label, color)?
            }
            Command::EndMarker => api.cmd_end_label(self.bound()?)?,
            Command::InsertMarker { label, color } => {
                api.cmd_insert_label(self.bound()?, &label, color)?
            }
            Command::Sync(event) => event.signal(),
        }
        Ok(())
    }
}

struct WorkQueue {
    commands: Vec<Command>,
    stop_requested: bool,
}

struct WorkerShared {
    queue: Mutex<WorkQueue>,
    wake: Condvar,
    recorder: Mutex<Recorder>,
}

/// A recording thread with its own command queue.
pub struct CommandWorker {
    name: String,
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl CommandWorker {
    /// Spawn a worker thread named `name`.
    pub fn spawn(api: Arc<dyn GpuApi>, name: impl Into<String>) -> Result<Self, DeviceError> {
        let name = name.into();
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(WorkQueue {
                commands: Vec::new(),
                stop_requested: false,
            }),
            wake: Condvar::new(),
            recorder: Mutex::new(Recorder::new(api, name.clone())),
        });

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(shared)
            })
            .map_err(|e| DeviceError::api("spawn worker thread", e.to_string()))?;

        log::debug!("Spawned command worker '{}'", name);
        Ok(Self {
            name,
            shared,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append one command for translation.
    pub fn push_command(&self, command: Command) {
        self.shared.queue.lock().commands.push(command);
        self.shared.wake.notify_one();
    }

    /// Append every command in `commands` in order, leaving it empty.
    pub fn push_commands(&self, commands: &mut Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        self.shared.queue.lock().commands.append(commands);
        self.shared.wake.notify_one();
    }

    /// Commands queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().commands.len()
    }

    /// See [`Recorder::set_command_buffer`].
    pub fn set_command_buffer(&self, buffer: CommandBuffer) -> Result<(), DeviceError> {
        self.shared.recorder.lock().set_command_buffer(buffer)
    }

    /// See [`Recorder::take_fault`].
    pub fn take_fault(&self) -> Option<DeviceError> {
        self.shared.recorder.lock().take_fault()
    }

    pub fn translated(&self) -> u64 {
        self.shared.recorder.lock().translated()
    }

    /// Ask the worker to exit once its queue is drained.
    pub fn request_stop(&self) {
        self.shared.queue.lock().stop_requested = true;
        self.shared.wake.notify_all();
    }

    /// Stop the worker and join its thread.
    pub fn stop(mut self) -> Result<(), DeviceError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), DeviceError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.request_stop();
        thread.join().map_err(|_| DeviceError::WorkerPanicked {
            name: self.name.clone(),
        })?;

        let pending = self.pending();
        if pending != 0 {
            return Err(DeviceError::contract(format!(
                "worker '{}' exited with {} queued commands",
                self.name, pending
            )));
        }
        log::debug!("Stopped command worker '{}'", self.name);
        Ok(())
    }
}

impl Drop for CommandWorker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::error!("Failed to stop command worker '{}': {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for CommandWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandWorker")
            .field("name", &self.name)
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

fn run(shared: Arc<WorkerShared>) {
    set_thread_name!("lilium command worker");

    let mut batch = Vec::new();
    loop {
        {
            let mut queue = shared.queue.lock();
            while queue.commands.is_empty() && !queue.stop_requested {
                shared.wake.wait(&mut queue);
            }
            if queue.commands.is_empty() {
                break;
            }
            std::mem::swap(&mut batch, &mut queue.commands);
        }

        profile_scope!("record batch");
        shared.recorder.lock().execute_batch(&mut batch);
    }
}

static_assertions::assert_impl_all!(CommandWorker: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{ApiCall, ApiCallKind, DummyBackend};
    use crate::command::DrawArgs;
    use crate::types::{Buffer, CommandBufferLevel, Pipeline, QueueType, ShaderStages};
    use lilium_core::RawHandle;

    fn setup() -> (Arc<DummyBackend>, CommandBuffer) {
        let api = Arc::new(DummyBackend::new());
        let pool = api.create_command_pool(QueueType::Graphics).unwrap();
        let cmd = api
            .allocate_command_buffer(pool, CommandBufferLevel::Secondary)
            .unwrap();
        (api, cmd)
    }

    fn pipeline_commands() -> (Pipeline, PipelineLayout, Buffer, Vec<Command>) {
        let pipeline = Pipeline(RawHandle::new(1, 1));
        let layout = PipelineLayout(RawHandle::new(2, 1));
        let vertices = Buffer(RawHandle::new(3, 1));
        let commands = vec![
            Command::GraphicsPipeline { pipeline, layout },
            Command::VertexBuffer {
                slot: 0,
                buffer: vertices,
                offset: 0,
            },
            Command::draw(36),
        ];
        (pipeline, layout, vertices, commands)
    }

    #[test]
    fn test_batch_translates_one_call_per_command() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api.clone(), "test lane");
        recorder.set_command_buffer(cmd).unwrap();

        let (pipeline, _, vertices, mut batch) = pipeline_commands();
        recorder.execute_batch(&mut batch);

        assert!(batch.is_empty());
        assert_eq!(
            api.calls_for(cmd),
            vec![
                ApiCall::BindPipeline {
                    cmd,
                    bind_point: BindPoint::Graphics,
                    pipeline,
                },
                ApiCall::BindVertexBuffer {
                    cmd,
                    slot: 0,
                    buffer: vertices,
                    offset: 0,
                },
                ApiCall::Draw {
                    cmd,
                    vertex_count: 36,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
            ]
        );
        assert_eq!(recorder.translated(), 3);
    }

    #[test]
    fn test_descriptor_bind_uses_pipeline_layout() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api.clone(), "test lane");
        recorder.set_command_buffer(cmd).unwrap();
        let layout = PipelineLayout(RawHandle::new(9, 1));

        recorder.execute(Command::GraphicsPipeline {
            pipeline: Pipeline(RawHandle::new(1, 1)),
            layout,
        });
        recorder.execute(Command::BindDescriptors {
            bind_point: BindPoint::Graphics,
            layout: None,
            first_set: 1,
            sets: Vec::new(),
            offsets: Vec::new(),
        });

        assert!(matches!(
            api.calls_for(cmd).last(),
            Some(ApiCall::BindDescriptorSets { layout: bound, first_set: 1, .. }) if *bound == layout
        ));
    }

    #[test]
    fn test_push_constants_without_layout_faults() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api, "test lane");
        recorder.set_command_buffer(cmd).unwrap();

        recorder.execute(Command::push_constants(ShaderStages::VERTEX, 0, &[0; 16]));
        assert!(matches!(
            recorder.take_fault(),
            Some(DeviceError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_negative_base_vertex_faults_non_indexed_draw() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api.clone(), "test lane");
        recorder.set_command_buffer(cmd).unwrap();

        recorder.execute(Command::Draw(DrawArgs {
            base_vertex: -4,
            num_vertices: 3,
            num_instances: 1,
            ..Default::default()
        }));
        assert!(matches!(
            recorder.take_fault(),
            Some(DeviceError::ContractViolation(_))
        ));
        assert_eq!(api.count(ApiCallKind::Draw), 0);
    }

    #[test]
    fn test_fault_drops_until_begin_but_signals_sync() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api.clone(), "test lane");
        recorder.set_command_buffer(cmd).unwrap();
        api.fail_next(ApiCallKind::BindPipeline, DeviceError::OutOfMemory);

        let sync = Arc::new(CompletionEvent::new());
        let (_, _, _, mut batch) = pipeline_commands();
        batch.push(Command::Sync(Arc::clone(&sync)));
        recorder.execute_batch(&mut batch);

        assert!(sync.is_signaled());
        assert_eq!(api.count(ApiCallKind::Draw), 0);
        assert_eq!(recorder.take_fault(), Some(DeviceError::OutOfMemory));
        assert_eq!(recorder.take_fault(), None);

        // A new Begin clears the latch.
        recorder.execute(Command::Begin {
            buffer: cmd,
            info: Default::default(),
        });
        recorder.execute(Command::draw(3));
        assert_eq!(api.count(ApiCallKind::Draw), 1);
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_begin_while_recording_is_rejected() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api, "test lane");
        let info = Default::default();
        recorder.execute(Command::Begin { buffer: cmd, info });
        recorder.execute(Command::Begin { buffer: cmd, info });
        assert!(matches!(
            recorder.take_fault(),
            Some(DeviceError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_rebind_while_recording_is_rejected() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api, "test lane");
        recorder.execute(Command::Begin {
            buffer: cmd,
            info: Default::default(),
        });
        assert!(recorder.set_command_buffer(cmd).is_err());
        recorder.execute(Command::End);
        assert!(recorder.set_command_buffer(cmd).is_ok());
    }

    #[test]
    fn test_stencil_refs_set_both_faces() {
        let (api, cmd) = setup();
        let mut recorder = Recorder::new(api.clone(), "test lane");
        recorder.set_command_buffer(cmd).unwrap();
        recorder.execute(Command::StencilRefs { front: 1, back: 2 });

        assert_eq!(
            api.calls_for(cmd),
            vec![
                ApiCall::SetStencilReference {
                    cmd,
                    faces: StencilFaces::FRONT,
                    reference: 1,
                },
                ApiCall::SetStencilReference {
                    cmd,
                    faces: StencilFaces::BACK,
                    reference: 2,
                },
            ]
        );
    }

    #[test]
    fn test_worker_thread_drains_queue() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (api, cmd) = setup();
        let worker = CommandWorker::spawn(api.clone(), "test worker").unwrap();
        worker.set_command_buffer(cmd).unwrap();

        let (_, _, _, commands) = pipeline_commands();
        for command in commands {
            worker.push_command(command);
        }
        let sync = Arc::new(CompletionEvent::new());
        worker.push_command(Command::Sync(Arc::clone(&sync)));
        sync.wait();

        assert_eq!(worker.pending(), 0);
        assert_eq!(api.calls_for(cmd).len(), 3);
        assert_eq!(worker.translated(), 3);
        worker.stop().unwrap();
    }

    #[test]
    fn test_worker_preserves_push_order() {
        let (api, cmd) = setup();
        let worker = CommandWorker::spawn(api.clone(), "order worker").unwrap();
        worker.set_command_buffer(cmd).unwrap();

        for i in 0..500 {
            worker.push_command(Command::draw(i + 1));
        }
        let sync = Arc::new(CompletionEvent::new());
        worker.push_command(Command::Sync(Arc::clone(&sync)));
        sync.wait();

        let counts: Vec<u32> = api
            .calls_for(cmd)
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Draw { vertex_count, .. } => Some(vertex_count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, (1..=500).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_drains_pending_commands() {
        let (api, cmd) = setup();
        let worker = CommandWorker::spawn(api.clone(), "stop worker").unwrap();
        worker.set_command_buffer(cmd).unwrap();
        let mut batch: Vec<Command> = (0..64).map(|_| Command::draw(3)).collect();
        worker.push_commands(&mut batch);
        assert!(batch.is_empty());

        worker.stop().unwrap();
        assert_eq!(api.count(ApiCallKind::Draw), 64);
    }
}
