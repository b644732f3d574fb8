//! Frame lifecycle and recording tests for the render device.
//!
//! # Test Categories
//!
//! - **Lane Tests**: draw lanes start lazily, replay shared state and are
//!   executed into the main graphics buffer in lane index order
//! - **Submission Tests**: per-queue main buffers are submitted in a fixed order
//! - **Routing Tests**: commands land where the command state sends them
//! - **Failure Tests**: state errors, lane faults and device loss

mod common;

use common::{TestContext, executed_into, layout, pass_info, secondary_buffers, submitted_queues};
use lilium_core::RawHandle;
use lilium_device::backend::dummy::{ApiCall, ApiCallKind};
use lilium_device::{
    Command, CommandState, DescriptorSet, DeviceError, FrameState, PipelineInfoBits,
    PipelineStages, PrimitiveGroup, QueueType,
};

fn kinds(calls: &[ApiCall]) -> Vec<ApiCallKind> {
    calls.iter().map(ApiCall::kind).collect()
}

fn draw_counts(calls: &[ApiCall]) -> Vec<u32> {
    calls
        .iter()
        .filter_map(|call| match call {
            ApiCall::Draw { vertex_count, .. } => Some(*vertex_count),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Lane Tests
// ============================================================================

#[test]
fn test_lanes_execute_in_index_order() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);

    ctx.device.begin_pass(pass_info()).unwrap();
    for n in 1..=3 {
        ctx.bind_pipeline();
        ctx.device.draw(&PrimitiveGroup::vertices(n * 3)).unwrap();
    }
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    let calls = ctx.api.calls();
    let lanes = secondary_buffers(&calls);
    assert_eq!(lanes.len(), 3);
    assert_eq!(executed_into(&calls, primary), vec![lanes.clone()]);
    for (lane, n) in lanes.iter().zip(1u32..) {
        assert_eq!(draw_counts(&ctx.api.calls_for(*lane)), vec![n * 3]);
    }

    assert_eq!(
        kinds(&ctx.api.calls_for(primary))[..5],
        [
            ApiCallKind::BeginCommandBuffer,
            ApiCallKind::BeginRenderPass,
            ApiCallKind::ExecuteCommands,
            ApiCallKind::EndRenderPass,
            ApiCallKind::EndCommandBuffer,
        ]
    );
    assert_eq!(ctx.device.stats().draw_lanes, 3);
    assert_eq!(ctx.device.stats().pipeline_binds, 3);
}

#[test]
fn test_lane_inherits_render_pass() {
    let mut ctx = TestContext::auto_retire();
    let info = pass_info();
    ctx.device.begin_frame(0).unwrap();
    ctx.device.begin_pass(info.clone()).unwrap();
    ctx.bind_pipeline();
    // Ending the pass waits for every lane to translate its queue.
    ctx.device.end_pass().unwrap();

    let calls = ctx.api.calls();
    let lane = secondary_buffers(&calls)[0];
    let Some(ApiCall::BeginCommandBuffer { info: begin, .. }) = ctx.api.calls_for(lane).first().cloned()
    else {
        panic!("lane did not begin");
    };
    let inheritance = begin.inheritance.expect("secondary inherits the pass");
    assert_eq!(inheritance.render_pass, Some(info.render_pass));
    assert_eq!(inheritance.framebuffer, Some(info.framebuffer));
    assert_eq!(inheritance.subpass, 0);

    ctx.device.end_frame().unwrap();
}

#[test]
fn test_shared_state_replayed_after_begin() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    ctx.device.begin_pass(pass_info()).unwrap();
    assert_eq!(ctx.device.command_state(), CommandState::Shared);

    ctx.device.set_stencil_refs(1, 2).unwrap();
    ctx.device.set_stencil_write_mask(0xff).unwrap();
    for _ in 0..2 {
        ctx.bind_pipeline();
        ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();
    }
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    let lanes = secondary_buffers(&ctx.api.calls());
    assert_eq!(lanes.len(), 2);
    for lane in lanes {
        assert_eq!(
            kinds(&ctx.api.calls_for(lane)),
            vec![
                ApiCallKind::BeginCommandBuffer,
                ApiCallKind::SetStencilReference,
                ApiCallKind::SetStencilReference,
                ApiCallKind::SetStencilWriteMask,
                ApiCallKind::BindPipeline,
                ApiCallKind::SetViewports,
                ApiCallKind::SetScissors,
                ApiCallKind::Draw,
                ApiCallKind::EndCommandBuffer,
            ]
        );
    }
}

#[test]
fn test_staging_holds_commands_until_threshold() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();

    // Pipeline, viewports and scissors are staged behind the threshold of 4.
    assert_eq!(ctx.device.draw_lanes().staged(0), 3);
    ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();
    assert_eq!(ctx.device.draw_lanes().staged(0), 0);
    ctx.device.draw(&PrimitiveGroup::vertices(6)).unwrap();
    assert_eq!(ctx.device.draw_lanes().staged(0), 1);
    ctx.device.flush_to_thread(0).unwrap();
    assert_eq!(ctx.device.draw_lanes().staged(0), 0);

    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();
    let lane = secondary_buffers(&ctx.api.calls())[0];
    assert_eq!(draw_counts(&ctx.api.calls_for(lane)), vec![3, 6]);
}

#[test]
fn test_deferred_descriptor_bind_follows_pipeline() {
    let mut ctx = TestContext::auto_retire();
    let set = DescriptorSet(RawHandle::new(4, 1));
    ctx.device.begin_frame(0).unwrap();

    // Outside a pass the bind waits for the next graphics pipeline.
    ctx.device
        .bind_descriptors_graphics(Some(layout(3)), 1, &[set], &[])
        .unwrap();
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    let lane = secondary_buffers(&ctx.api.calls())[0];
    let lane_calls = ctx.api.calls_for(lane);
    let bind = lane_calls
        .iter()
        .position(|call| call.kind() == ApiCallKind::BindDescriptorSets)
        .expect("descriptor bind recorded on the lane");
    let pipeline = lane_calls
        .iter()
        .position(|call| call.kind() == ApiCallKind::BindPipeline)
        .unwrap();
    assert!(pipeline < bind);
    assert!(matches!(
        &lane_calls[bind],
        ApiCall::BindDescriptorSets { layout: bound, first_set: 1, sets, .. }
            if *bound == layout(3) && sets == &vec![set]
    ));
}

#[test]
fn test_next_subpass_ends_lanes() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);
    ctx.device
        .begin_pass(pass_info().with_subpass(Default::default()))
        .unwrap();
    ctx.bind_pipeline();
    ctx.device.next_subpass().unwrap();
    assert_eq!(ctx.device.subpass(), 1);
    assert_eq!(ctx.device.command_state(), CommandState::Shared);
    assert_eq!(ctx.device.draw_lanes().active(), 0);

    ctx.bind_pipeline();
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    let calls = ctx.api.calls();
    assert_eq!(executed_into(&calls, primary).len(), 2);
    assert_eq!(ctx.api.count(ApiCallKind::NextSubpass), 1);
}

// ============================================================================
// Submission Tests
// ============================================================================

#[test]
fn test_main_buffers_submitted_in_queue_order() {
    let mut ctx = TestContext::auto_retire();
    ctx.empty_frame(0);
    assert_eq!(
        submitted_queues(&ctx.api.calls()),
        vec![QueueType::Transfer, QueueType::Compute, QueueType::Graphics]
    );
    assert_eq!(ctx.device.stats().submissions, 3);
}

#[test]
fn test_compute_lanes_execute_into_compute_buffer() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Compute);
    ctx.device.begin_compute_threads().unwrap();
    ctx.device
        .push_to_lane(QueueType::Compute, 1, Command::Dispatch { x: 8, y: 1, z: 1 })
        .unwrap();
    ctx.device.end_frame().unwrap();

    let calls = ctx.api.calls();
    let lanes = secondary_buffers(&calls);
    assert_eq!(lanes.len(), 2);
    assert_eq!(executed_into(&calls, primary), vec![lanes.clone()]);
    assert!(matches!(
        ctx.api.calls_for(lanes[1])[1],
        ApiCall::Dispatch { x: 8, y: 1, z: 1, .. }
    ));
}

#[test]
fn test_main_fences_reset_every_frame() {
    let mut ctx = TestContext::new();
    for frame in 0..3 {
        ctx.empty_frame(frame);
    }
    let fence = ctx.device.main_fence(QueueType::Graphics).unwrap();
    assert!(!ctx.api.is_fence_signaled(fence));
    assert!(!ctx.device.is_in_frame());
}

// ============================================================================
// Routing Tests
// ============================================================================

#[test]
fn test_compute_dispatch_on_main_graphics() {
    let mut ctx = TestContext::auto_retire();
    let (pipeline, compute_layout) = ctx.pipeline();
    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);

    assert!(matches!(
        ctx.device.compute(1, 1, 1),
        Err(DeviceError::InvalidState { .. })
    ));
    ctx.device
        .bind_compute_pipeline(pipeline, compute_layout)
        .unwrap();
    ctx.device.compute(4, 4, 1).unwrap();

    ctx.device.begin_pass(pass_info()).unwrap();
    assert!(matches!(
        ctx.device.compute(1, 1, 1),
        Err(DeviceError::InvalidState { .. })
    ));
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    assert!(
        ctx.api
            .calls_for(primary)
            .iter()
            .any(|call| matches!(call, ApiCall::Dispatch { x: 4, y: 4, z: 1, .. }))
    );
}

#[test]
fn test_markers_outside_pass_go_to_main_buffer() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);
    ctx.device.begin_marker("shadows", [1.0, 0.0, 0.0, 1.0]).unwrap();
    ctx.device.end_marker().unwrap();

    ctx.device.begin_pass(pass_info()).unwrap();
    assert!(matches!(
        ctx.device.insert_marker("no lane", [0.0; 4]),
        Err(DeviceError::InvalidState { .. })
    ));
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();

    assert!(ctx.api.calls_for(primary).iter().any(
        |call| matches!(call, ApiCall::BeginLabel { label, .. } if label == "shadows")
    ));
    assert_eq!(ctx.api.count(ApiCallKind::InsertLabel), 0);
}

#[test]
fn test_events_are_tracked() {
    let mut ctx = TestContext::auto_retire();
    let event = ctx.device.create_event().unwrap();
    ctx.device.begin_frame(0).unwrap();
    ctx.device
        .set_event(event, PipelineStages::ALL_COMMANDS)
        .unwrap();
    ctx.device.end_frame().unwrap();
    assert_eq!(ctx.api.count(ApiCallKind::SetEvent), 1);

    ctx.device.destroy_event(event).unwrap();
    assert!(matches!(
        ctx.device.destroy_event(event),
        Err(DeviceError::InvalidHandle { .. })
    ));
    assert_eq!(ctx.api.live_events(), 0);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_state_errors_do_not_abort_frame() {
    let mut ctx = TestContext::auto_retire();
    assert!(matches!(
        ctx.device.end_frame(),
        Err(DeviceError::InvalidState { .. })
    ));

    ctx.device.begin_frame(0).unwrap();
    assert!(matches!(
        ctx.device.draw(&PrimitiveGroup::vertices(3)),
        Err(DeviceError::InvalidState { .. })
    ));
    assert!(matches!(
        ctx.device.build_render_pipeline(),
        Err(DeviceError::InvalidState { .. })
    ));
    ctx.device.begin_pass(pass_info()).unwrap();
    assert!(matches!(
        ctx.device.draw(&PrimitiveGroup::vertices(3)),
        Err(DeviceError::InvalidState { .. })
    ));
    assert!(matches!(
        ctx.device.end_frame(),
        Err(DeviceError::InvalidState { .. })
    ));
    assert!(!ctx.device.is_frame_aborted());

    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_lane_fault_aborts_frame() {
    let mut ctx = TestContext::auto_retire();
    ctx.api.fail_next(ApiCallKind::Draw, DeviceError::OutOfMemory);

    ctx.device.begin_frame(0).unwrap();
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();
    ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();

    match ctx.device.end_pass() {
        Err(DeviceError::LaneFailed { lane: 0, source }) => {
            assert_eq!(*source, DeviceError::OutOfMemory)
        }
        other => panic!("expected lane failure, got {other:?}"),
    }
    assert!(ctx.device.is_frame_aborted());
    assert!(matches!(
        ctx.device.draw(&PrimitiveGroup::vertices(3)),
        Err(DeviceError::FrameAborted { .. })
    ));
    assert!(matches!(
        ctx.device.end_frame(),
        Err(DeviceError::FrameAborted { .. })
    ));
    assert!(!ctx.device.is_in_frame());
    assert!(!ctx.device.is_in_pass());
    // Only the three main buffers survive; the faulted lane buffer is freed.
    assert_eq!(ctx.api.live_command_buffers(), 3);

    // The next frame records normally.
    ctx.device.begin_frame(1).unwrap();
    assert!(!ctx.device.is_frame_aborted());
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();
    ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();
    assert_eq!(ctx.api.count(ApiCallKind::Draw), 1);
}

#[test]
fn test_device_lost_latches() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    ctx.api.lose_device();

    assert_eq!(
        ctx.device.begin_pass(pass_info()),
        Err(DeviceError::DeviceLost)
    );
    assert!(ctx.device.is_device_lost());
    assert_eq!(ctx.device.end_frame(), Err(DeviceError::DeviceLost));
    assert_eq!(ctx.device.begin_frame(1), Err(DeviceError::DeviceLost));

    let _ = ctx.device.close();
    assert!(ctx.device.is_closed());
}

#[test]
fn test_api_failure_in_pass_aborts_frame() {
    let mut ctx = TestContext::auto_retire();
    ctx.api
        .fail_next(ApiCallKind::BeginRenderPass, DeviceError::OutOfMemory);
    ctx.device.begin_frame(0).unwrap();
    assert_eq!(
        ctx.device.begin_pass(pass_info()),
        Err(DeviceError::OutOfMemory)
    );
    assert!(ctx.device.is_frame_aborted());
    assert!(!ctx.device.is_device_lost());
    assert!(matches!(
        ctx.device.end_frame(),
        Err(DeviceError::FrameAborted { .. })
    ));
    ctx.empty_frame(1);
}

// ============================================================================
// State Tests
// ============================================================================

#[test]
fn test_frame_state_transitions() {
    let mut ctx = TestContext::auto_retire();
    assert_eq!(ctx.device.frame_state(), FrameState::Idle);

    ctx.device.begin_frame(0).unwrap();
    assert_eq!(ctx.device.frame_state(), FrameState::Idle);
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();
    assert_eq!(ctx.device.frame_state(), FrameState::RecordingThreads);
    ctx.device.end_pass().unwrap();
    assert_eq!(ctx.device.frame_state(), FrameState::ThreadsSubmitted);
    ctx.device.end_frame().unwrap();
    // The lane buffer frees wait on a fence.
    assert_eq!(ctx.device.frame_state(), FrameState::FencesPending);

    ctx.device.begin_frame(1).unwrap();
    assert_eq!(ctx.device.frame_state(), FrameState::Idle);
    ctx.device.end_frame().unwrap();
    assert_eq!(ctx.device.frame_state(), FrameState::Idle);
}

#[test]
fn test_pipeline_info_bits() {
    let mut ctx = TestContext::auto_retire();
    let (pipeline, pipeline_layout) = ctx.pipeline();
    ctx.device.begin_frame(0).unwrap();
    ctx.device
        .set_graphics_pipeline(pipeline, pipeline_layout)
        .unwrap();
    assert_eq!(ctx.device.pipeline_bits(), PipelineInfoBits::SHADER_INFO);

    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.device.build_render_pipeline().unwrap();
    assert!(ctx.device.pipeline_bits().contains(
        PipelineInfoBits::SHADER_INFO
            | PipelineInfoBits::FRAMEBUFFER_INFO
            | PipelineInfoBits::PIPELINE_BUILT
    ));
    assert_eq!(ctx.device.command_state(), CommandState::Local);

    ctx.device.end_pass().unwrap();
    assert_eq!(ctx.device.pipeline_bits(), PipelineInfoBits::empty());
    assert_eq!(ctx.device.command_state(), CommandState::Main);
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_close_releases_everything() {
    let mut ctx = TestContext::new();
    ctx.device.create_event().unwrap();
    for frame in 0..2 {
        ctx.device.begin_frame(frame).unwrap();
        ctx.device.begin_pass(pass_info()).unwrap();
        ctx.bind_pipeline();
        ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();
        ctx.device.end_pass().unwrap();
        ctx.device.begin_transfer_threads().unwrap();
        ctx.device.end_frame().unwrap();
    }
    assert!(ctx.api.live_command_buffers() > 3);
    assert!(ctx.device.scheduler().total_outstanding_fences() > 0);

    ctx.device.close().unwrap();
    assert!(ctx.device.is_closed());
    assert_eq!(ctx.api.live_fences(), 0);
    assert_eq!(ctx.api.live_command_pools(), 0);
    assert_eq!(ctx.api.live_command_buffers(), 0);
    assert_eq!(ctx.api.live_events(), 0);
    assert!(ctx.device.scheduler().is_empty());

    // Closing twice is a no-op; recording on a closed device is refused.
    ctx.device.close().unwrap();
    assert!(matches!(
        ctx.device.begin_frame(2),
        Err(DeviceError::InvalidState { .. })
    ));
}
