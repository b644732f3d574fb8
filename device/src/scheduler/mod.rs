//! Deferred command scheduling.
//!
//! The [`Scheduler`] decouples *when a caller wants a GPU effect* from *when
//! it is safe to run it*. It keeps one FIFO per [`CommandPass`] and, for each
//! queue, a list of fence buckets awaiting GPU completion.
//!
//! # Frame bracketing
//!
//! | Call | Effect |
//! |------|--------|
//! | [`push_command`](Scheduler::push_command) | Append to a pass; a fence pass also flags its queue |
//! | [`begin`](Scheduler::begin) | Re-arm the flags of queues with unsealed fence-pass commands |
//! | [`end_queue`](Scheduler::end_queue) | If flagged: new fence, seal pending commands under it, fenced no-op submit |
//! | [`execute_command_pass`](Scheduler::execute_command_pass) | Run an ordinary pass, or poll a fence pass |
//! | [`discard`](Scheduler::discard) | Run everything unconditionally (shutdown) |
//!
//! ```text
//!   frame N                               frame N+1..
//!   push(FreeBuffer, OnHandleDrawFences)
//!   push(FreeImage,  OnHandleDrawFences)
//!   end_draws()  -> F_N: [FreeBuffer, FreeImage]   poll: F_N unsignaled, kept
//!                                                 poll: F_N signaled -> run both,
//!                                                       destroy F_N
//! ```
//!
//! All commands pushed onto one queue's fence pass within a frame share a
//! single fence. The scheduler is driven from the frame thread only.

mod pass;

pub use pass::CommandPass;

use std::sync::Arc;

use crate::backend::GpuApi;
use crate::deferred::{DeferredCommand, DeferredKind, DelegateTarget, FollowUps};
use crate::error::{DeviceError, DeviceResult};
use crate::types::{
    Buffer, ClearColor, ClearDepthStencil, CommandBuffer, CommandPool, Fence, FenceStatus, Image,
    ImageBarrier, ImageInfo, ImageLayout, Memory, Pipeline, QueueType, SubresourceRange,
};

/// Follow-up rounds `discard` runs before giving up on commands that keep
/// spawning more.
const MAX_DISCARD_ROUNDS: usize = 4;

/// Deferred commands sealed under one fence.
#[derive(Debug)]
struct FenceBucket {
    fence: Fence,
    commands: Vec<DeferredCommand>,
}

/// Holds deferred commands until their pass, and their fence, come up.
pub struct Scheduler {
    api: Arc<dyn GpuApi>,
    passes: [Vec<DeferredCommand>; CommandPass::COUNT],
    fence_needed: [bool; QueueType::COUNT],
    buckets: [Vec<FenceBucket>; QueueType::COUNT],
}

impl Scheduler {
    pub fn new(api: Arc<dyn GpuApi>) -> Self {
        Self {
            api,
            passes: std::array::from_fn(|_| Vec::new()),
            fence_needed: [false; QueueType::COUNT],
            buckets: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Queue a command for `pass`.
    pub fn push_command(&mut self, command: DeferredCommand, pass: CommandPass) {
        if let Some(queue) = pass.fence_queue() {
            self.fence_needed[queue.index()] = true;
        }
        log::trace!("Scheduled {} ({} queue) for {}", command.name(), command.queue, pass);
        self.passes[pass.index()].push(command);
    }

    pub fn push_image_layout_transition(
        &mut self,
        queue: QueueType,
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: SubresourceRange,
    ) {
        let barrier = ImageBarrier::layout_transition(image, old_layout, new_layout, range);
        self.push_command(
            DeferredCommand::new(queue, DeferredKind::ImageLayoutTransition { barrier }),
            CommandPass::OnBeginFrame,
        );
    }

    /// Queue the barrier that hands `image` from `from` to `to`.
    ///
    /// The barrier is recorded on `from`'s main buffer.
    pub fn push_image_ownership_change(
        &mut self,
        image: Image,
        layout: ImageLayout,
        from: QueueType,
        to: QueueType,
        range: SubresourceRange,
    ) {
        let barrier = ImageBarrier::ownership_transfer(image, layout, from, to, range);
        self.push_command(
            DeferredCommand::new(from, DeferredKind::ImageOwnershipChange { barrier }),
            CommandPass::OnBeginFrame,
        );
    }

    pub fn push_image_color_clear(
        &mut self,
        queue: QueueType,
        image: Image,
        layout: ImageLayout,
        value: ClearColor,
        range: SubresourceRange,
    ) {
        self.push_command(
            DeferredCommand::new(
                queue,
                DeferredKind::ClearColorImage {
                    image,
                    layout,
                    value,
                    range,
                },
            ),
            CommandPass::OnBeginFrame,
        );
    }

    pub fn push_image_depth_stencil_clear(
        &mut self,
        queue: QueueType,
        image: Image,
        layout: ImageLayout,
        value: ClearDepthStencil,
        range: SubresourceRange,
    ) {
        self.push_command(
            DeferredCommand::new(
                queue,
                DeferredKind::ClearDepthStencilImage {
                    image,
                    layout,
                    value,
                    range,
                },
            ),
            CommandPass::OnBeginFrame,
        );
    }

    /// Queue an upload of `data` into one mip of one layer of `image`.
    ///
    /// The bytes are copied; the caller's slice can be reused immediately.
    pub fn push_image_update(
        &mut self,
        image: Image,
        info: ImageInfo,
        mip: u32,
        face: u32,
        data: &[u8],
    ) {
        self.push_command(
            DeferredCommand::new(
                QueueType::Transfer,
                DeferredKind::UpdateImage {
                    image,
                    info,
                    mip,
                    face,
                    data: data.into(),
                },
            ),
            CommandPass::OnBeginFrame,
        );
    }

    pub fn push_buffer_update(&mut self, queue: QueueType, buffer: Buffer, offset: u64, data: &[u8]) {
        self.push_command(
            DeferredCommand::new(
                queue,
                DeferredKind::UpdateBuffer {
                    buffer,
                    offset,
                    data: data.into(),
                },
            ),
            CommandPass::OnBeginFrame,
        );
    }

    /// Free a buffer once everything submitted to `queue` so far retires.
    pub fn push_free_buffer(&mut self, queue: QueueType, buffer: Buffer, memory: Option<Memory>) {
        self.push_command(
            DeferredCommand::new(queue, DeferredKind::FreeBuffer { buffer, memory }),
            CommandPass::handle_fences(queue),
        );
    }

    pub fn push_free_image(&mut self, queue: QueueType, image: Image, memory: Option<Memory>) {
        self.push_command(
            DeferredCommand::new(queue, DeferredKind::FreeImage { image, memory }),
            CommandPass::handle_fences(queue),
        );
    }

    pub fn push_free_command_buffers(
        &mut self,
        queue: QueueType,
        pool: CommandPool,
        buffers: Vec<CommandBuffer>,
    ) {
        self.push_command(
            DeferredCommand::new(queue, DeferredKind::FreeCmdBuffers { pool, buffers }),
            CommandPass::handle_fences(queue),
        );
    }

    pub fn push_destroy_pipeline(&mut self, queue: QueueType, pipeline: Pipeline) {
        self.push_command(
            DeferredCommand::new(queue, DeferredKind::DestroyPipeline { pipeline }),
            CommandPass::handle_fences(queue),
        );
    }

    /// Start a frame.
    ///
    /// A queue whose fence pass still holds unsealed commands (pushed after
    /// that queue's last `end_queue`) is flagged again, so the next
    /// `end_queue` seals them.
    pub fn begin(&mut self) {
        for queue in QueueType::ALL {
            let pass = CommandPass::handle_fences(queue);
            self.fence_needed[queue.index()] = !self.passes[pass.index()].is_empty();
        }
    }

    /// Seal `queue`'s pending fence-pass commands under a new fence.
    ///
    /// Does nothing unless a fence-pass push flagged the queue. Otherwise
    /// creates exactly one fence, submits it on `queue` behind all earlier
    /// work and returns it.
    pub fn end_queue(&mut self, queue: QueueType) -> DeviceResult<Option<Fence>> {
        let q = queue.index();
        if !self.fence_needed[q] {
            return Ok(None);
        }
        let pass = CommandPass::handle_fences(queue);
        if self.passes[pass.index()].is_empty() {
            self.fence_needed[q] = false;
            return Ok(None);
        }

        let fence = self.api.create_fence(false).inspect_err(|e| {
            log::error!("Failed to create {} deferred fence: {}", queue, e);
        })?;
        if let Err(e) = self.api.queue_submit(queue, &[], Some(fence)) {
            log::error!("Failed to submit {} deferred fence: {}", queue, e);
            if let Err(destroy) = self.api.destroy_fence(fence) {
                log::error!("Failed to destroy unsubmitted {}: {}", fence, destroy);
            }
            return Err(e);
        }

        let commands = std::mem::take(&mut self.passes[pass.index()]);
        log::debug!(
            "Sealed {} deferred commands under {} on {} queue",
            commands.len(),
            fence,
            queue
        );
        self.buckets[q].push(FenceBucket { fence, commands });
        self.fence_needed[q] = false;
        Ok(Some(fence))
    }

    pub fn end_transfers(&mut self) -> DeviceResult<Option<Fence>> {
        self.end_queue(QueueType::Transfer)
    }

    pub fn end_draws(&mut self) -> DeviceResult<Option<Fence>> {
        self.end_queue(QueueType::Graphics)
    }

    pub fn end_computes(&mut self) -> DeviceResult<Option<Fence>> {
        self.end_queue(QueueType::Compute)
    }

    pub fn end_sparse(&mut self) -> DeviceResult<Option<Fence>> {
        self.end_queue(QueueType::Sparse)
    }

    /// Run a pass and return how many commands executed.
    ///
    /// An ordinary pass runs its whole FIFO. A fence pass polls the queue's
    /// buckets without blocking; each signaled bucket runs in push order, then
    /// its fence is destroyed and the bucket removed. Unsignaled buckets stay
    /// for the next poll.
    ///
    /// A failing delegate stops the list it belongs to; the rest of that list
    /// is dropped, not retried.
    pub fn execute_command_pass(
        &mut self,
        pass: CommandPass,
        target: &mut dyn DelegateTarget,
    ) -> DeviceResult<usize> {
        lilium_core::profile_scope!("execute_command_pass");

        let mut followups = FollowUps::new();
        let result = match pass.fence_queue() {
            Some(queue) => self.drain_signaled(queue, target, &mut followups),
            None => {
                let commands = std::mem::take(&mut self.passes[pass.index()]);
                Self::run_list(pass, commands, target, &mut followups)
            }
        };
        self.absorb(&mut followups);
        result
    }

    fn drain_signaled(
        &mut self,
        queue: QueueType,
        target: &mut dyn DelegateTarget,
        followups: &mut FollowUps,
    ) -> DeviceResult<usize> {
        let pass = CommandPass::handle_fences(queue);
        let q = queue.index();
        let mut executed = 0;
        let mut index = 0;
        while index < self.buckets[q].len() {
            let fence = self.buckets[q][index].fence;
            let status = self.api.get_fence_status(fence).inspect_err(|e| {
                log::error!("Failed to query {} on {} queue: {}", fence, queue, e);
            })?;
            if status == FenceStatus::Unsignaled {
                index += 1;
                continue;
            }

            let bucket = self.buckets[q].remove(index);
            log::debug!(
                "{} signaled, running {} deferred commands",
                fence,
                bucket.commands.len()
            );
            let result = Self::run_list(pass, bucket.commands, target, followups);
            self.api.destroy_fence(bucket.fence)?;
            executed += result?;
        }
        Ok(executed)
    }

    fn run_list(
        pass: CommandPass,
        commands: Vec<DeferredCommand>,
        target: &mut dyn DelegateTarget,
        followups: &mut FollowUps,
    ) -> DeviceResult<usize> {
        let total = commands.len();
        for (done, command) in commands.into_iter().enumerate() {
            let name = command.name();
            if let Err(e) = target.run_delegate(command, followups) {
                log::error!(
                    "Deferred {} failed in {}: {}; dropping {} remaining",
                    name,
                    pass,
                    e,
                    total - done - 1
                );
                return Err(e);
            }
        }
        Ok(total)
    }

    fn absorb(&mut self, followups: &mut FollowUps) {
        let spawned: Vec<_> = followups.drain().collect();
        for (command, pass) in spawned {
            self.push_command(command, pass);
        }
    }

    /// Run every remaining command of every pass in declaration order,
    /// ignoring fence status, and destroy every bucket fence.
    ///
    /// Only for teardown: the caller must have waited for the GPU. Failures do
    /// not stop the discard; the first one is returned.
    pub fn discard(&mut self, target: &mut dyn DelegateTarget) -> DeviceResult<usize> {
        let mut executed = 0;
        let mut first_error = None;

        for round in 0..MAX_DISCARD_ROUNDS {
            let mut followups = FollowUps::new();
            for pass in CommandPass::ALL {
                if let Some(queue) = pass.fence_queue() {
                    for bucket in std::mem::take(&mut self.buckets[queue.index()]) {
                        executed +=
                            Self::run_all(pass, bucket.commands, target, &mut followups, &mut first_error);
                        if let Err(e) = self.api.destroy_fence(bucket.fence) {
                            log::error!("Failed to destroy {}: {}", bucket.fence, e);
                            first_error.get_or_insert(e);
                        }
                    }
                    self.fence_needed[queue.index()] = false;
                }
                let commands = std::mem::take(&mut self.passes[pass.index()]);
                executed += Self::run_all(pass, commands, target, &mut followups, &mut first_error);
            }

            if followups.is_empty() {
                break;
            }
            if round + 1 == MAX_DISCARD_ROUNDS {
                log::warn!("Dropping {} deferred follow-ups at discard", followups.len());
                break;
            }
            self.absorb(&mut followups);
        }

        self.fence_needed = [false; QueueType::COUNT];
        log::debug!("Discarded scheduler: {} commands executed", executed);
        first_error.map_or(Ok(executed), Err)
    }

    fn run_all(
        pass: CommandPass,
        commands: Vec<DeferredCommand>,
        target: &mut dyn DelegateTarget,
        followups: &mut FollowUps,
        first_error: &mut Option<DeviceError>,
    ) -> usize {
        if !commands.is_empty() {
            log::warn!("Discarding {} pending commands of {}", commands.len(), pass);
        }
        let mut executed = 0;
        for command in commands {
            let name = command.name();
            match target.run_delegate(command, followups) {
                Ok(()) => executed += 1,
                Err(e) => {
                    log::error!("Deferred {} failed during discard: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        executed
    }

    /// Commands waiting in `pass`, not counting sealed buckets.
    pub fn pending(&self, pass: CommandPass) -> usize {
        self.passes[pass.index()].len()
    }

    pub fn total_pending(&self) -> usize {
        self.passes.iter().map(Vec::len).sum()
    }

    /// Fence buckets on `queue` not yet drained.
    pub fn outstanding_fences(&self, queue: QueueType) -> usize {
        self.buckets[queue.index()].len()
    }

    pub fn total_outstanding_fences(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Fences of every undrained bucket, in creation order per queue.
    pub fn outstanding_fence_handles(&self) -> Vec<Fence> {
        self.buckets
            .iter()
            .flat_map(|buckets| buckets.iter().map(|bucket| bucket.fence))
            .collect()
    }

    /// Commands sealed under fences on `queue`.
    pub fn sealed(&self, queue: QueueType) -> usize {
        self.buckets[queue.index()]
            .iter()
            .map(|bucket| bucket.commands.len())
            .sum()
    }

    pub fn fence_needed(&self, queue: QueueType) -> bool {
        self.fence_needed[queue.index()]
    }

    /// Nothing pending and no fence outstanding.
    pub fn is_empty(&self) -> bool {
        self.total_pending() == 0 && self.total_outstanding_fences() == 0
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.total_pending())
            .field("outstanding_fences", &self.total_outstanding_fences())
            .field("fence_needed", &self.fence_needed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{ApiCall, ApiCallKind, DummyBackend};
    use rstest::rstest;

    /// Records every delegate it is asked to run.
    #[derive(Default)]
    struct Journal {
        ran: Vec<DeferredCommand>,
        fail_at: Option<usize>,
    }

    impl DelegateTarget for Journal {
        fn run_delegate(
            &mut self,
            command: DeferredCommand,
            _followups: &mut FollowUps,
        ) -> Result<(), DeviceError> {
            if self.fail_at == Some(self.ran.len()) {
                self.fail_at = None;
                return Err(DeviceError::api("test", "delegate failure"));
            }
            self.ran.push(command);
            Ok(())
        }
    }

    impl Journal {
        fn freed_buffers(&self) -> Vec<Buffer> {
            self.ran
                .iter()
                .filter_map(|command| match command.kind {
                    DeferredKind::FreeBuffer { buffer, .. } => Some(buffer),
                    _ => None,
                })
                .collect()
        }
    }

    fn scheduler() -> (Arc<DummyBackend>, Scheduler) {
        let api = Arc::new(DummyBackend::new());
        let scheduler = Scheduler::new(api.clone());
        (api, scheduler)
    }

    #[test]
    fn test_free_buffer_waits_for_transfer_fence() {
        let (api, mut scheduler) = scheduler();
        let mut journal = Journal::default();
        let buffer = api.create_buffer(64);

        scheduler.begin();
        scheduler.push_free_buffer(QueueType::Transfer, buffer, None);
        assert_eq!(
            scheduler
                .execute_command_pass(CommandPass::OnHandleTransferFences, &mut journal)
                .unwrap(),
            0
        );
        assert!(journal.ran.is_empty());

        let fence = scheduler.end_transfers().unwrap().unwrap();
        scheduler
            .execute_command_pass(CommandPass::OnHandleTransferFences, &mut journal)
            .unwrap();
        assert!(journal.ran.is_empty());

        api.signal_fence(fence);
        let executed = scheduler
            .execute_command_pass(CommandPass::OnHandleTransferFences, &mut journal)
            .unwrap();
        assert_eq!(executed, 1);
        assert_eq!(journal.freed_buffers(), vec![buffer]);
        assert_eq!(api.count(ApiCallKind::DestroyFence), 1);
        assert_eq!(api.live_fences(), 0);

        // Re-polling a drained queue is a no-op.
        let executed = scheduler
            .execute_command_pass(CommandPass::OnHandleTransferFences, &mut journal)
            .unwrap();
        assert_eq!(executed, 0);
        assert_eq!(journal.ran.len(), 1);
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(64)]
    fn test_one_fence_per_queue_per_frame(#[case] count: usize) {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        for _ in 0..count {
            let buffer = api.create_buffer(16);
            scheduler.push_free_buffer(QueueType::Graphics, buffer, None);
        }

        assert!(scheduler.end_draws().unwrap().is_some());
        assert!(scheduler.end_draws().unwrap().is_none());
        assert_eq!(api.count(ApiCallKind::CreateFence), 1);
        assert_eq!(scheduler.outstanding_fences(QueueType::Graphics), 1);
        assert_eq!(scheduler.sealed(QueueType::Graphics), count);
    }

    #[test]
    fn test_fence_is_submitted_on_its_queue() {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        scheduler.push_destroy_pipeline(QueueType::Compute, api.create_pipeline());
        let fence = scheduler.end_computes().unwrap().unwrap();

        let submits: Vec<ApiCall> = api
            .calls()
            .into_iter()
            .filter(|call| call.kind() == ApiCallKind::QueueSubmit)
            .collect();
        assert_eq!(
            submits,
            vec![ApiCall::QueueSubmit {
                queue: QueueType::Compute,
                command_buffers: Vec::new(),
                fence: Some(fence),
            }]
        );
    }

    #[test]
    fn test_no_fence_without_fence_pass_push() {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        scheduler.push_image_color_clear(
            QueueType::Graphics,
            api.create_image(),
            ImageLayout::General,
            ClearColor::Float([0.0; 4]),
            SubresourceRange::color(),
        );
        for queue in QueueType::ALL {
            assert!(scheduler.end_queue(queue).unwrap().is_none());
        }
        assert_eq!(api.count(ApiCallKind::CreateFence), 0);
    }

    #[test]
    fn test_bucket_runs_in_push_order() {
        let (api, mut scheduler) = scheduler();
        let buffers: Vec<Buffer> = (0..10).map(|_| api.create_buffer(8)).collect();
        scheduler.begin();
        for buffer in &buffers {
            scheduler.push_free_buffer(QueueType::Graphics, *buffer, None);
        }
        scheduler.end_draws().unwrap();
        api.retire_all();

        let mut journal = Journal::default();
        scheduler
            .execute_command_pass(CommandPass::OnHandleDrawFences, &mut journal)
            .unwrap();
        assert_eq!(journal.freed_buffers(), buffers);
    }

    #[test]
    fn test_later_bucket_waits_while_earlier_drains() {
        let (api, mut scheduler) = scheduler();
        let first = api.create_buffer(8);
        let second = api.create_buffer(8);

        scheduler.begin();
        scheduler.push_free_buffer(QueueType::Graphics, first, None);
        let first_fence = scheduler.end_draws().unwrap().unwrap();
        scheduler.begin();
        scheduler.push_free_buffer(QueueType::Graphics, second, None);
        scheduler.end_draws().unwrap().unwrap();

        api.signal_fence(first_fence);
        let mut journal = Journal::default();
        scheduler
            .execute_command_pass(CommandPass::OnHandleDrawFences, &mut journal)
            .unwrap();
        assert_eq!(journal.freed_buffers(), vec![first]);
        assert_eq!(scheduler.outstanding_fences(QueueType::Graphics), 1);
    }

    #[test]
    fn test_push_after_end_is_sealed_next_frame() {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        assert!(scheduler.end_draws().unwrap().is_none());
        scheduler.push_free_image(QueueType::Graphics, api.create_image(), None);

        scheduler.begin();
        assert!(scheduler.fence_needed(QueueType::Graphics));
        assert!(scheduler.end_draws().unwrap().is_some());
        assert_eq!(scheduler.pending(CommandPass::OnHandleDrawFences), 0);
    }

    #[test]
    fn test_ordinary_pass_failure_drops_remaining() {
        let (api, mut scheduler) = scheduler();
        for _ in 0..4 {
            scheduler.push_buffer_update(QueueType::Graphics, api.create_buffer(4), 0, &[1, 2, 3, 4]);
        }
        let mut journal = Journal {
            fail_at: Some(1),
            ..Default::default()
        };

        assert!(scheduler
            .execute_command_pass(CommandPass::OnBeginFrame, &mut journal)
            .is_err());
        assert_eq!(journal.ran.len(), 1);
        assert_eq!(scheduler.pending(CommandPass::OnBeginFrame), 0);

        // Nothing is retried on the next run.
        assert_eq!(
            scheduler
                .execute_command_pass(CommandPass::OnBeginFrame, &mut journal)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_fence_query_failure_is_fatal() {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        scheduler.push_free_buffer(QueueType::Transfer, api.create_buffer(4), None);
        scheduler.end_transfers().unwrap();
        api.fail_next(ApiCallKind::GetFenceStatus, DeviceError::DeviceLost);

        let result = scheduler
            .execute_command_pass(CommandPass::OnHandleTransferFences, &mut Journal::default());
        assert_eq!(result, Err(DeviceError::DeviceLost));
    }

    #[test]
    fn test_discard_runs_everything() {
        let (api, mut scheduler) = scheduler();
        scheduler.begin();
        for queue in [QueueType::Graphics, QueueType::Compute, QueueType::Transfer] {
            scheduler.push_free_buffer(queue, api.create_buffer(4), None);
            scheduler.end_queue(queue).unwrap();
        }
        scheduler.push_free_buffer(QueueType::Sparse, api.create_buffer(4), None);
        scheduler.push_image_layout_transition(
            QueueType::Graphics,
            api.create_image(),
            ImageLayout::Undefined,
            ImageLayout::General,
            SubresourceRange::color(),
        );

        let mut journal = Journal::default();
        let executed = scheduler.discard(&mut journal).unwrap();
        assert_eq!(executed, 5);
        assert!(scheduler.is_empty());
        assert_eq!(api.live_fences(), 0);
        for queue in QueueType::ALL {
            assert!(!scheduler.fence_needed(queue));
        }
    }
}
