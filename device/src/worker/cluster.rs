//! A fixed group of recording lanes for one queue.
//!
//! Each lane pairs a [`CommandWorker`] with its own command pool (pools are
//! not thread safe, so lanes never share one), the secondary command buffer it
//! is currently recording, a completion event and a staging list.
//!
//! ```text
//!            cursor (advance = (cursor + 1) % N)
//!               │
//!   ┌────────┬──▼─────┬────────┬────────┐
//!   │ lane 0 │ lane 1 │ lane 2 │  ...   │   each: worker + pool + buffer
//!   └───┬────┴───┬────┴───┬────┴────────┘         + staging + completion
//!       │        │        │
//!   end_all(): push End + Sync to every active lane, then wait each
//!              completion in index order and hand the buffers back
//! ```

use std::sync::Arc;

use crate::backend::GpuApi;
use crate::command::Command;
use crate::error::DeviceError;
use crate::types::{BeginInfo, CommandBuffer, CommandBufferLevel, CommandPool, QueueType};

use super::{CommandWorker, CompletionEvent};

/// A finished secondary command buffer and the pool it must be freed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneBuffer {
    pub lane: usize,
    pub pool: CommandPool,
    pub buffer: CommandBuffer,
}

/// Result of ending every active lane of a cluster.
#[derive(Debug)]
pub struct ClusterOutput {
    /// Finished buffers in lane index order.
    pub buffers: Vec<LaneBuffer>,
    /// The first lane failure, as [`DeviceError::LaneFailed`].
    pub fault: Option<DeviceError>,
}

impl ClusterOutput {
    pub fn command_buffers(&self) -> Vec<CommandBuffer> {
        self.buffers.iter().map(|lane| lane.buffer).collect()
    }
}

struct Lane {
    worker: CommandWorker,
    pool: CommandPool,
    buffer: Option<CommandBuffer>,
    completion: Arc<CompletionEvent>,
    staging: Vec<Command>,
}

/// Recording lanes for one queue.
pub struct ThreadCluster {
    api: Arc<dyn GpuApi>,
    queue: QueueType,
    lanes: Vec<Lane>,
    current: usize,
    flush_threshold: usize,
}

impl ThreadCluster {
    /// Spawn `count` lanes, each with its own command pool on `queue`.
    ///
    /// A `flush_threshold` of zero disables staging.
    pub fn new(
        api: Arc<dyn GpuApi>,
        queue: QueueType,
        count: usize,
        flush_threshold: usize,
        name_prefix: &str,
    ) -> Result<Self, DeviceError> {
        if count == 0 {
            return Err(DeviceError::Config(format!(
                "{queue} cluster needs at least one lane"
            )));
        }

        let mut cluster = Self {
            api,
            queue,
            lanes: Vec::with_capacity(count),
            current: count - 1,
            flush_threshold,
        };
        for index in 0..count {
            if let Err(e) = cluster.spawn_lane(index, name_prefix) {
                log::error!("Failed to create {} lane {}: {}", queue, index, e);
                if let Err(cleanup) = cluster.shutdown() {
                    log::error!("Failed to clean up {} cluster: {}", queue, cleanup);
                }
                return Err(e);
            }
        }

        log::debug!("Created {} cluster with {} lanes", queue, count);
        Ok(cluster)
    }

    fn spawn_lane(&mut self, index: usize, name_prefix: &str) -> Result<(), DeviceError> {
        let pool = self.api.create_command_pool(self.queue)?;
        let worker = match CommandWorker::spawn(
            Arc::clone(&self.api),
            format!("{name_prefix} {} {index}", self.queue),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                self.api.destroy_command_pool(pool)?;
                return Err(e);
            }
        };
        self.lanes.push(Lane {
            worker,
            pool,
            buffer: None,
            completion: Arc::new(CompletionEvent::new()),
            staging: Vec::with_capacity(self.flush_threshold),
        });
        Ok(())
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Lanes currently recording a buffer.
    pub fn active(&self) -> usize {
        self.lanes.iter().filter(|lane| lane.buffer.is_some()).count()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.lanes.get(index).is_some_and(|lane| lane.buffer.is_some())
    }

    /// The lane the cursor points at.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Park the cursor so the next [`advance`](Self::advance) selects lane 0.
    pub fn reset_cursor(&mut self) {
        self.current = self.lanes.len().saturating_sub(1);
    }

    /// Move the cursor to the next lane, wrapping around.
    pub fn advance(&mut self) -> usize {
        if !self.lanes.is_empty() {
            self.current = (self.current + 1) % self.lanes.len();
        }
        self.current
    }

    /// Staged commands on a lane.
    pub fn staged(&self, index: usize) -> usize {
        self.lanes.get(index).map_or(0, |lane| lane.staging.len())
    }

    /// Commands queued on a lane's worker and not yet picked up.
    pub fn pending(&self, index: usize) -> usize {
        self.lanes.get(index).map_or(0, |lane| lane.worker.pending())
    }

    fn lane_mut(&mut self, index: usize) -> Result<&mut Lane, DeviceError> {
        let queue = self.queue;
        let len = self.lanes.len();
        self.lanes.get_mut(index).ok_or_else(|| {
            DeviceError::contract(format!("{queue} lane {index} out of range (0..{len})"))
        })
    }

    /// Allocate a secondary buffer from the lane's pool and queue its Begin.
    pub fn begin_lane(
        &mut self,
        index: usize,
        info: &BeginInfo,
    ) -> Result<CommandBuffer, DeviceError> {
        let api = Arc::clone(&self.api);
        let queue = self.queue;
        let lane = self.lane_mut(index)?;
        if lane.buffer.is_some() {
            return Err(DeviceError::contract(format!(
                "{queue} lane {index} is already recording"
            )));
        }

        let buffer = api.allocate_command_buffer(lane.pool, CommandBufferLevel::Secondary)?;
        lane.worker.push_command(Command::Begin {
            buffer,
            info: *info,
        });
        lane.buffer = Some(buffer);
        log::trace!("{} lane {} began {}", queue, index, buffer);
        Ok(buffer)
    }

    /// Queue a command on an active lane.
    ///
    /// With `allow_staging` the command is held in the lane's staging list
    /// and handed to the worker in bulk once the list reaches the flush
    /// threshold. A direct push flushes staged commands first, so per-lane
    /// order is always push order.
    pub fn push(
        &mut self,
        index: usize,
        command: Command,
        allow_staging: bool,
    ) -> Result<(), DeviceError> {
        let threshold = self.flush_threshold;
        let queue = self.queue;
        let lane = self.lane_mut(index)?;
        if lane.buffer.is_none() {
            return Err(DeviceError::contract(format!(
                "{queue} lane {index} is not recording"
            )));
        }

        if allow_staging && threshold > 0 {
            lane.staging.push(command);
            if lane.staging.len() >= threshold {
                lane.worker.push_commands(&mut lane.staging);
            }
        } else {
            lane.worker.push_commands(&mut lane.staging);
            lane.worker.push_command(command);
        }
        Ok(())
    }

    /// Hand a lane's staged commands to its worker.
    pub fn flush(&mut self, index: usize) -> Result<(), DeviceError> {
        let lane = self.lane_mut(index)?;
        lane.worker.push_commands(&mut lane.staging);
        Ok(())
    }

    /// Flush every active lane.
    pub fn flush_all(&mut self) {
        for lane in self.lanes.iter_mut().filter(|lane| lane.buffer.is_some()) {
            lane.worker.push_commands(&mut lane.staging);
        }
    }

    /// End every active lane and wait until each has translated everything.
    ///
    /// All lanes receive End and Sync before the first wait, so they finish
    /// in parallel. Buffers come back in lane index order and the cursor is
    /// parked again.
    pub fn end_all(&mut self) -> ClusterOutput {
        for lane in self.lanes.iter_mut().filter(|lane| lane.buffer.is_some()) {
            lane.worker.push_commands(&mut lane.staging);
            lane.worker.push_command(Command::End);
            lane.worker
                .push_command(Command::Sync(Arc::clone(&lane.completion)));
        }

        let mut buffers = Vec::new();
        let mut fault = None;
        for (index, lane) in self.lanes.iter_mut().enumerate() {
            let Some(buffer) = lane.buffer.take() else {
                continue;
            };
            lane.completion.wait();
            lane.completion.reset();

            if let Some(error) = lane.worker.take_fault() {
                log::error!("{} lane {} failed: {}", self.queue, index, error);
                if fault.is_none() {
                    fault = Some(DeviceError::LaneFailed {
                        lane: index,
                        source: Box::new(error),
                    });
                }
            }
            buffers.push(LaneBuffer {
                lane: index,
                pool: lane.pool,
                buffer,
            });
        }

        log::trace!("{} cluster ended {} lanes", self.queue, buffers.len());
        self.reset_cursor();
        ClusterOutput { buffers, fault }
    }

    /// Stop every worker and destroy the lane pools.
    ///
    /// Lanes still recording are abandoned; their buffers go away with the
    /// pool. Keeps going after a failure and reports the first one.
    pub fn shutdown(&mut self) -> Result<(), DeviceError> {
        let mut first_error = None;
        for (index, mut lane) in self.lanes.drain(..).enumerate() {
            if let Some(buffer) = lane.buffer.take() {
                log::warn!(
                    "{} lane {} still recording {} at shutdown",
                    self.queue,
                    index,
                    buffer
                );
            }
            lane.staging.clear();
            let stopped = lane.worker.stop();
            let destroyed = self.api.destroy_command_pool(lane.pool);
            for result in [stopped, destroyed] {
                if let Err(e) = result {
                    log::error!("{} lane {} shutdown failed: {}", self.queue, index, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.current = 0;
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ThreadCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCluster")
            .field("queue", &self.queue)
            .field("lanes", &self.lanes.len())
            .field("active", &self.active())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
