//! Deferred resource lifetime tests.
//!
//! Resources released during a frame must survive until the GPU has retired
//! every submission that could still reference them. The dummy backend only
//! signals a fence once something waits past it, which makes the retirement
//! point of each release observable frame by frame.

mod common;

use common::{TestContext, pass_info, test_config};
use lilium_device::backend::dummy::{ApiCall, ApiCallKind, DummyBackend};
use lilium_core::RawHandle;
use lilium_device::{
    BindPoint, ClearColor, CommandPass, DeferredCommand, DeferredKind, DescriptorSet, DeviceConfig,
    DeviceError, ImageBarrier, ImageLayout, PrimitiveGroup, QueueType, SubresourceRange,
};

fn layout_transition(image: lilium_device::Image) -> DeferredCommand {
    DeferredCommand::new(
        QueueType::Graphics,
        DeferredKind::ImageLayoutTransition {
            barrier: ImageBarrier::layout_transition(
                image,
                ImageLayout::Undefined,
                ImageLayout::ShaderReadOnly,
                SubresourceRange::color(),
            ),
        },
    )
}

fn count(calls: &[ApiCall], kind: ApiCallKind) -> usize {
    calls.iter().filter(|call| call.kind() == kind).count()
}

// ============================================================================
// Fenced Release Tests
// ============================================================================

#[test]
fn test_free_buffer_waits_for_fence() {
    let mut ctx = TestContext::new();
    let buffer = ctx.api.create_buffer(256);
    let memory = ctx.api.allocate_memory(256);

    ctx.device.begin_frame(0).unwrap();
    ctx.device
        .push_free_buffer(QueueType::Graphics, buffer, Some(memory));
    ctx.device.end_frame().unwrap();
    assert_eq!(ctx.api.live_buffers(), 1);
    assert_eq!(ctx.device.scheduler().outstanding_fences(QueueType::Graphics), 1);

    // The release fence sits behind frame 0's main submission and has not
    // been reached by the time frame 1 begins.
    ctx.device.begin_frame(1).unwrap();
    assert_eq!(ctx.api.live_buffers(), 1);
    ctx.device.end_frame().unwrap();

    ctx.device.begin_frame(2).unwrap();
    assert_eq!(ctx.api.live_buffers(), 0);
    assert_eq!(ctx.api.live_memory(), 0);
    assert_eq!(ctx.device.scheduler().outstanding_fences(QueueType::Graphics), 0);
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_releases_share_one_fence_per_queue() {
    let mut ctx = TestContext::new();
    ctx.device.begin_frame(0).unwrap();
    for _ in 0..5 {
        let buffer = ctx.api.create_buffer(64);
        ctx.device.push_free_buffer(QueueType::Graphics, buffer, None);
    }
    let image = ctx.api.create_image();
    ctx.device.push_free_image(QueueType::Transfer, image, None);

    ctx.api.take_calls();
    ctx.device.end_frame().unwrap();
    let calls = ctx.api.take_calls();

    assert_eq!(count(&calls, ApiCallKind::CreateFence), 2);
    assert_eq!(ctx.device.scheduler().outstanding_fences(QueueType::Graphics), 1);
    assert_eq!(ctx.device.scheduler().sealed(QueueType::Graphics), 5);
    assert_eq!(ctx.device.scheduler().outstanding_fences(QueueType::Transfer), 1);
    assert_eq!(ctx.device.scheduler().outstanding_fences(QueueType::Compute), 0);
}

#[test]
fn test_release_between_frames_sealed_next_frame() {
    let mut ctx = TestContext::auto_retire();
    ctx.empty_frame(0);

    let pipeline = ctx.api.create_pipeline();
    ctx.device.push_destroy_pipeline(QueueType::Graphics, pipeline);
    let pass = CommandPass::handle_fences(QueueType::Graphics);
    assert_eq!(ctx.device.scheduler().pending(pass), 1);

    ctx.empty_frame(1);
    assert_eq!(ctx.device.scheduler().pending(pass), 0);
    assert_eq!(ctx.device.scheduler().sealed(QueueType::Graphics), 1);
    assert_eq!(ctx.api.live_pipelines(), 1);

    ctx.empty_frame(2);
    assert_eq!(ctx.api.live_pipelines(), 0);
}

#[test]
fn test_lane_buffers_freed_after_retire() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.begin_frame(0).unwrap();
    ctx.device.begin_pass(pass_info()).unwrap();
    ctx.bind_pipeline();
    ctx.device.draw(&PrimitiveGroup::vertices(3)).unwrap();
    ctx.device.end_pass().unwrap();
    ctx.device.end_frame().unwrap();
    assert_eq!(ctx.api.live_command_buffers(), 4);

    ctx.device.begin_frame(1).unwrap();
    assert_eq!(ctx.api.live_command_buffers(), 3);
    assert_eq!(ctx.api.count(ApiCallKind::FreeCommandBuffers), 1);
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_close_discards_pending_releases() {
    let mut ctx = TestContext::new();
    let buffer = ctx.api.create_buffer(128);
    let image = ctx.api.create_image();

    ctx.device.begin_frame(0).unwrap();
    ctx.device.push_free_buffer(QueueType::Graphics, buffer, None);
    ctx.device.end_frame().unwrap();
    // Never sealed: pushed after the last frame ended.
    ctx.device.push_free_image(QueueType::Compute, image, None);

    ctx.device.close().unwrap();
    assert_eq!(ctx.api.live_buffers(), 0);
    assert_eq!(ctx.api.live_images(), 0);
    assert_eq!(ctx.api.live_fences(), 0);
}

// ============================================================================
// Recorded Deferred Work Tests
// ============================================================================

#[test]
fn test_layout_transitions_applied_once() {
    let mut ctx = TestContext::auto_retire();
    let images: Vec<_> = (0..3).map(|_| ctx.api.create_image()).collect();
    for image in &images {
        ctx.device.push_image_layout_transition(
            QueueType::Graphics,
            *image,
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnly,
            SubresourceRange::color(),
        );
    }

    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);
    let transitioned: Vec<_> = ctx
        .api
        .calls_for(primary)
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::PipelineBarrier { barrier, .. } => Some(barrier),
            _ => None,
        })
        .flat_map(|barrier| barrier.images)
        .collect();
    assert_eq!(transitioned.len(), 3);
    for (barrier, image) in transitioned.iter().zip(&images) {
        assert_eq!(barrier.image, *image);
        assert_eq!(barrier.old_layout, ImageLayout::Undefined);
        assert_eq!(barrier.new_layout, ImageLayout::ShaderReadOnly);
    }
    ctx.device.end_frame().unwrap();

    ctx.empty_frame(1);
    assert_eq!(ctx.api.count(ApiCallKind::PipelineBarrier), 3);
}

#[test]
fn test_ownership_change_recorded_on_source_queue() {
    let mut ctx = TestContext::auto_retire();
    let image = ctx.api.create_image();
    ctx.device.push_image_ownership_change(
        image,
        ImageLayout::ShaderReadOnly,
        QueueType::Transfer,
        QueueType::Graphics,
        SubresourceRange::color(),
    );

    ctx.device.begin_frame(0).unwrap();
    let transfer = ctx.main_buffer(QueueType::Transfer);
    let barriers: Vec<_> = ctx
        .api
        .calls_for(transfer)
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::PipelineBarrier { barrier, .. } => Some(barrier),
            _ => None,
        })
        .collect();
    assert_eq!(barriers.len(), 1);
    let handoff = &barriers[0].images[0];
    assert_eq!(handoff.src_queue, Some(QueueType::Transfer));
    assert_eq!(handoff.dst_queue, Some(QueueType::Graphics));
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_clear_and_upload_recorded_at_frame_start() {
    let mut ctx = TestContext::auto_retire();
    let image = ctx.api.create_image();
    let buffer = ctx.api.create_buffer(64);
    ctx.device.push_image_color_clear(
        QueueType::Graphics,
        image,
        ImageLayout::TransferDst,
        ClearColor::Float([0.0, 0.0, 0.0, 1.0]),
        SubresourceRange::color(),
    );
    ctx.device
        .push_buffer_update(QueueType::Transfer, buffer, 0, &[7u8; 64]);

    ctx.device.begin_frame(0).unwrap();
    let graphics = ctx.main_buffer(QueueType::Graphics);
    let transfer = ctx.main_buffer(QueueType::Transfer);
    assert!(
        ctx.api
            .calls_for(graphics)
            .iter()
            .any(|call| matches!(call, ApiCall::ClearColorImage { image: cleared, .. } if *cleared == image))
    );
    assert!(ctx.api.calls_for(transfer).iter().any(|call| matches!(
        call,
        ApiCall::UpdateBuffer { buffer: updated, size: 64, .. } if *updated == buffer
    )));
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_buffer_update_split_into_chunks() {
    let config = test_config().with_update_chunk_size(16);
    let mut ctx = TestContext::with_backend(DummyBackend::auto_retire(), config);
    let buffer = ctx.api.create_buffer(40);
    ctx.device
        .push_buffer_update(QueueType::Graphics, buffer, 8, &[1u8; 40]);

    ctx.device.begin_frame(0).unwrap();
    let primary = ctx.main_buffer(QueueType::Graphics);
    let chunks: Vec<(u64, usize)> = ctx
        .api
        .calls_for(primary)
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::UpdateBuffer { offset, size, .. } => Some((offset, size)),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![(8, 16), (24, 16), (40, 8)]);
    ctx.device.end_frame().unwrap();
}

#[test]
fn test_recording_after_main_submit_fails_frame() {
    let mut ctx = TestContext::auto_retire();
    let image = ctx.api.create_image();
    ctx.device
        .push_deferred(layout_transition(image), CommandPass::OnEndFrame);

    ctx.device.begin_frame(0).unwrap();
    let result = ctx.device.end_frame();
    assert!(matches!(result, Err(DeviceError::ContractViolation(_))));
    assert_eq!(ctx.api.count(ApiCallKind::PipelineBarrier), 0);
    assert_eq!(ctx.device.scheduler().pending(CommandPass::OnEndFrame), 0);
    assert!(!ctx.device.is_in_frame());

    // The failure is confined to that frame.
    ctx.empty_frame(1);
    assert!(!ctx.device.is_frame_aborted());
}

#[test]
fn test_graphics_bind_without_lane_fails_frame() {
    let mut ctx = TestContext::auto_retire();
    ctx.device.push_deferred(
        DeferredCommand::new(
            QueueType::Graphics,
            DeferredKind::BindDescriptorSets {
                bind_point: BindPoint::Graphics,
                layout: None,
                first_set: 0,
                sets: vec![DescriptorSet(RawHandle::new(2, 1))],
                offsets: Vec::new(),
            },
        ),
        CommandPass::OnBeginFrame,
    );

    let result = ctx.device.begin_frame(0);
    assert!(matches!(result, Err(DeviceError::ContractViolation(_))));
    assert!(ctx.device.is_frame_aborted());
    assert!(matches!(
        ctx.device.end_frame(),
        Err(DeviceError::FrameAborted { .. })
    ));
    assert_eq!(ctx.api.count(ApiCallKind::BindDescriptorSets), 0);
}

#[test]
fn test_close_drops_unrecordable_commands() {
    let mut ctx = TestContext::auto_retire();
    ctx.empty_frame(0);
    let image = ctx.api.create_image();
    ctx.device
        .push_deferred(layout_transition(image), CommandPass::OnEndFrame);

    ctx.device.close().unwrap();
    assert_eq!(ctx.api.count(ApiCallKind::PipelineBarrier), 0);
    assert!(ctx.device.scheduler().is_empty());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_loads_from_file() {
    let path = std::env::temp_dir().join(format!(
        "lilium-device-config-{}.toml",
        std::process::id()
    ));
    let config = test_config().with_draw_threads(2);
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    let loaded = DeviceConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, config);

    let ctx = TestContext::with_backend(DummyBackend::new(), loaded);
    assert_eq!(ctx.device.draw_lanes().len(), 2);
    assert_eq!(ctx.device.compute_lanes().len(), 2);
    assert_eq!(ctx.device.transfer_lanes().len(), 1);
}

#[test]
fn test_invalid_config_refused_at_open() {
    let api = std::sync::Arc::new(DummyBackend::new());
    let result = lilium_device::RenderDevice::open(api.clone(), test_config().with_draw_threads(0));
    assert!(matches!(result, Err(lilium_device::DeviceError::Config(_))));
    assert_eq!(api.live_command_pools(), 0);
}
