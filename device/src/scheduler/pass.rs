//! Frame lifecycle checkpoints.

use crate::types::QueueType;

/// A point in the frame at which a queue of deferred commands is flushed.
///
/// Ordinary passes run once each time the device reaches them. The four
/// `OnHandle*Fences` passes are polled: their commands are grouped under a
/// fence and run only once that fence signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandPass {
    OnBeginFrame,
    OnBeginPass,
    OnNextSubpass,
    OnEndPass,
    OnMainTransferSubmitted,
    OnMainComputeSubmitted,
    OnMainDrawSubmitted,
    OnMainSparseSubmitted,
    OnEndFrame,
    OnBindGraphicsPipeline,
    OnBindComputePipeline,
    OnBeginDrawThread,
    OnDrawThreadsSubmitted,
    OnHandleTransferFences,
    OnHandleDrawFences,
    OnHandleComputeFences,
    OnHandleSparseFences,
}

impl CommandPass {
    pub const COUNT: usize = 17;

    /// Every pass in declaration order.
    pub const ALL: [CommandPass; Self::COUNT] = [
        CommandPass::OnBeginFrame,
        CommandPass::OnBeginPass,
        CommandPass::OnNextSubpass,
        CommandPass::OnEndPass,
        CommandPass::OnMainTransferSubmitted,
        CommandPass::OnMainComputeSubmitted,
        CommandPass::OnMainDrawSubmitted,
        CommandPass::OnMainSparseSubmitted,
        CommandPass::OnEndFrame,
        CommandPass::OnBindGraphicsPipeline,
        CommandPass::OnBindComputePipeline,
        CommandPass::OnBeginDrawThread,
        CommandPass::OnDrawThreadsSubmitted,
        CommandPass::OnHandleTransferFences,
        CommandPass::OnHandleDrawFences,
        CommandPass::OnHandleComputeFences,
        CommandPass::OnHandleSparseFences,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The queue whose fences gate this pass, for the `OnHandle*Fences` passes.
    pub const fn fence_queue(self) -> Option<QueueType> {
        match self {
            CommandPass::OnHandleTransferFences => Some(QueueType::Transfer),
            CommandPass::OnHandleDrawFences => Some(QueueType::Graphics),
            CommandPass::OnHandleComputeFences => Some(QueueType::Compute),
            CommandPass::OnHandleSparseFences => Some(QueueType::Sparse),
            _ => None,
        }
    }

    pub const fn is_fence_pass(self) -> bool {
        self.fence_queue().is_some()
    }

    /// The fence-gated pass for `queue`.
    pub const fn handle_fences(queue: QueueType) -> Self {
        match queue {
            QueueType::Graphics => CommandPass::OnHandleDrawFences,
            QueueType::Compute => CommandPass::OnHandleComputeFences,
            QueueType::Transfer => CommandPass::OnHandleTransferFences,
            QueueType::Sparse => CommandPass::OnHandleSparseFences,
        }
    }

    /// The pass run right after `queue`'s main command buffer is submitted.
    pub const fn main_submitted(queue: QueueType) -> Self {
        match queue {
            QueueType::Graphics => CommandPass::OnMainDrawSubmitted,
            QueueType::Compute => CommandPass::OnMainComputeSubmitted,
            QueueType::Transfer => CommandPass::OnMainTransferSubmitted,
            QueueType::Sparse => CommandPass::OnMainSparseSubmitted,
        }
    }
}

impl std::fmt::Display for CommandPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_declaration_order() {
        for (i, pass) in CommandPass::ALL.iter().enumerate() {
            assert_eq!(pass.index(), i);
        }
    }

    #[test]
    fn test_each_queue_has_one_fence_pass() {
        for queue in QueueType::ALL {
            let pass = CommandPass::handle_fences(queue);
            assert_eq!(pass.fence_queue(), Some(queue));
            assert!(!CommandPass::main_submitted(queue).is_fence_pass());
        }
        let fence_passes = CommandPass::ALL
            .iter()
            .filter(|pass| pass.is_fence_pass())
            .count();
        assert_eq!(fence_passes, QueueType::COUNT);
    }
}
