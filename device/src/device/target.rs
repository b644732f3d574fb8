//! Runs deferred commands against the device's lanes and main buffers.

use crate::command::Command;
use crate::deferred::{DeferredCommand, DeferredKind, DelegateTarget, FollowUps, RecordContext};
use crate::error::DeviceError;
use crate::types::BindPoint;
use crate::worker::ThreadCluster;

pub(super) struct DeviceTarget<'a> {
    pub ctx: RecordContext<'a>,
    pub draw: &'a mut ThreadCluster,
    /// The device is closing: commands with nowhere to record are dropped
    /// instead of failing the teardown.
    pub teardown: bool,
}

impl DeviceTarget<'_> {
    fn unrecordable(&self, command: &DeferredCommand, reason: String) -> Result<(), DeviceError> {
        if self.teardown {
            log::warn!("Discarding deferred {} at close: {}", command.name(), reason);
            return Ok(());
        }
        Err(DeviceError::contract(format!(
            "deferred {} cannot be recorded: {}",
            command.name(),
            reason
        )))
    }
}

impl DelegateTarget for DeviceTarget<'_> {
    fn run_delegate(
        &mut self,
        command: DeferredCommand,
        followups: &mut FollowUps,
    ) -> Result<(), DeviceError> {
        // Graphics binds belong to the lane the pipeline was just bound on.
        if matches!(
            command.kind,
            DeferredKind::BindDescriptorSets {
                bind_point: BindPoint::Graphics,
                ..
            }
        ) && !self.draw.is_active(self.draw.current())
        {
            return self.unrecordable(&command, "no active draw lane".to_string());
        }
        if let DeferredKind::BindDescriptorSets {
            bind_point: BindPoint::Graphics,
            layout,
            first_set,
            sets,
            offsets,
        } = command.kind
        {
            let lane = self.draw.current();
            return self.draw.push(
                lane,
                Command::BindDescriptors {
                    bind_point: BindPoint::Graphics,
                    layout,
                    first_set,
                    sets,
                    offsets,
                },
                false,
            );
        }

        if let Some(queue) = command.recording_queue()
            && self.ctx.main_buffer(queue).is_none()
        {
            return self.unrecordable(&command, format!("{queue} command buffer is not recording"));
        }
        command.execute(&self.ctx, followups)
    }
}
