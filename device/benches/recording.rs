use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use lilium_core::RawHandle;
use lilium_device::backend::dummy::DummyBackend;
use lilium_device::{
    BeginInfo, Command, CommandBufferLevel, DeviceConfig, DrawArgs, Framebuffer, GpuApi, PassInfo,
    PipelineLayout, PrimitiveGroup, QueueType, Rect2D, Recorder, RenderDevice, RenderPass,
};

fn draw_batch(count: u32) -> Vec<Command> {
    (0..count)
        .map(|i| Command::Draw(DrawArgs::new(&PrimitiveGroup::vertices(3 + i % 7), 1, 0)))
        .collect()
}

// ---------------------------------------------------------------------------
// Command translation
// ---------------------------------------------------------------------------

fn bench_recorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("recorder_translate");
    for count in [64u32, 1024] {
        let api = Arc::new(DummyBackend::new());
        let pool = api.create_command_pool(QueueType::Graphics).unwrap();
        let buffer = api
            .allocate_command_buffer(pool, CommandBufferLevel::Primary)
            .unwrap();
        let mut recorder = Recorder::new(api.clone(), "bench");

        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut batch = draw_batch(count);
                recorder.execute(Command::Begin {
                    buffer,
                    info: BeginInfo::one_time(),
                });
                recorder.execute_batch(black_box(&mut batch));
                recorder.execute(Command::End);
                black_box(recorder.take_fault());
                api.take_calls();
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Full frames
// ---------------------------------------------------------------------------

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_draws");
    for lanes in [1usize, 4] {
        let api = Arc::new(DummyBackend::auto_retire());
        let config = DeviceConfig::new()
            .with_draw_threads(lanes)
            .with_compute_threads(1)
            .with_transfer_threads(1)
            .with_worker_name_prefix("bench");
        let mut device = RenderDevice::open(api.clone(), config).unwrap();
        let pipeline = api.create_pipeline();
        let layout = PipelineLayout(RawHandle::new(1, 1));
        let info = PassInfo::new(
            RenderPass(RawHandle::new(1, 1)),
            Framebuffer(RawHandle::new(1, 1)),
            Rect2D::new(0, 0, 1280, 720),
        );
        let mut frame = 0;

        group.bench_function(BenchmarkId::from_parameter(lanes), |b| {
            b.iter(|| {
                device.begin_frame(frame).unwrap();
                device.begin_pass(info.clone()).unwrap();
                for _ in 0..lanes {
                    device.set_graphics_pipeline(pipeline, layout).unwrap();
                    device.build_render_pipeline().unwrap();
                    for i in 0..256 {
                        device.draw(black_box(&PrimitiveGroup::vertices(3 + i % 5))).unwrap();
                    }
                }
                device.end_pass().unwrap();
                device.end_frame().unwrap();
                frame += 1;
                api.take_calls();
            });
        });
        device.close().unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_recorder, bench_frame);
criterion_main!(benches);
