//! Benchmarks for writing frames and packing archives.
//!
//! Run with: cargo bench
//!
//! The FFmpeg benchmark requires `tests/fixtures/sample_video.mp4` from
//! `tests/fixtures/generate_fixtures.sh`; the others use synthetic frames.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion};
use framezip::{
    ArtifactStore, CancellationToken, DiskStore, ExportEngine, OperationType, ProgressReporter,
    TempStoreHandle,
};
use image::{DynamicImage, Rgb, RgbImage};

fn synthetic_frame(index: u64, width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x as u64 + index) as u8,
            (y as u64 + index) as u8,
            (index * 7) as u8,
        ])
    }))
}

fn populated_store(store: &DiskStore, frames: u64) -> TempStoreHandle {
    let handle = store.create().unwrap();
    for index in 0..frames {
        store
            .write_frame(&handle, index, &synthetic_frame(index, 320, 240))
            .unwrap();
    }
    handle
}

fn benchmark_frame_writes(criterion: &mut Criterion) {
    let directory = tempfile::tempdir().unwrap();
    let store = DiskStore::new(directory.path());
    let handle = store.create().unwrap();
    let frame = synthetic_frame(0, 640, 360);

    criterion.bench_function("write 640x360 frame", |bencher| {
        bencher.iter(|| store.write_frame(&handle, 0, &frame).unwrap());
    });
}

fn benchmark_export(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("export archive");
    group.sample_size(20);

    for frames in [10_u64, 100] {
        let directory = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::new(directory.path().join("stores")));
        let handle = populated_store(&store, frames);
        let engine = ExportEngine::new(store.clone());
        let destination = directory.path().join("frames.zip");

        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |bencher, _| {
            bencher.iter(|| {
                engine
                    .export_blocking(
                        &handle,
                        &destination,
                        &ProgressReporter::detached(OperationType::Export),
                        &CancellationToken::new(),
                    )
                    .unwrap()
            });
        });
    }

    group.finish();
}

#[cfg(feature = "ffmpeg")]
fn benchmark_ffmpeg_conversion(criterion: &mut Criterion) {
    use framezip::{ConversionEngine, FfmpegBackend, FfmpegLogLevel, SamplingConfig, VideoSource};

    const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

    framezip::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    if !std::path::Path::new(SAMPLE_VIDEO).exists() {
        eprintln!("Skipping benchmark: fixture not found");
        return;
    }

    let directory = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskStore::new(directory.path()));
    let engine = ConversionEngine::new(Arc::new(FfmpegBackend::new()), store.clone());
    let source = VideoSource::from_path(SAMPLE_VIDEO);
    let config = SamplingConfig::new().with_frames_per_second(2.0);

    criterion.bench_function("convert fixture at 2 fps", |bencher| {
        bencher.iter(|| {
            let conversion = engine
                .convert_blocking(
                    &source,
                    &config,
                    &ProgressReporter::detached(OperationType::Conversion),
                    &CancellationToken::new(),
                )
                .unwrap();
            store.release(&conversion.store).unwrap();
        });
    });
}

#[cfg(not(feature = "ffmpeg"))]
fn benchmark_ffmpeg_conversion(_criterion: &mut Criterion) {}

criterion::criterion_group!(
    benches,
    benchmark_frame_writes,
    benchmark_export,
    benchmark_ffmpeg_conversion,
);
criterion::criterion_main!(benches);
