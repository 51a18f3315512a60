//! FFmpeg backend integration tests.
//!
//! Tests that decode real video require `tests/fixtures/sample_video.mp4`
//! from `tests/fixtures/generate_fixtures.sh` (5 s, 30 fps, 320x240) and
//! are skipped when it is missing.

#![cfg(feature = "ffmpeg")]

use std::{path::Path, sync::Arc};

use framezip::{
    CancellationToken, ConversionEngine, DiskStore, FfmpegBackend, FfmpegLogLevel,
    FramezipError, MediaBackend, OperationType, ProgressReporter, SamplingConfig, Session,
    VideoSource,
};
use image::GenericImageView;

fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

fn fixture_available() -> bool {
    Path::new(sample_video_path()).exists()
}

// ── Log level ──────────────────────────────────────────────────────

#[test]
fn log_level_parses_names() {
    assert_eq!("quiet".parse::<FfmpegLogLevel>(), Ok(FfmpegLogLevel::Quiet));
    assert_eq!("WARN".parse::<FfmpegLogLevel>(), Ok(FfmpegLogLevel::Warning));
    assert_eq!("debug".parse::<FfmpegLogLevel>(), Ok(FfmpegLogLevel::Debug));
    assert!("verbose-ish".parse::<FfmpegLogLevel>().is_err());
    assert_eq!(FfmpegLogLevel::Error.to_string(), "error");
}

#[test]
fn set_log_level_does_not_panic() {
    framezip::set_ffmpeg_log_level(FfmpegLogLevel::Error);
}

// ── video_info ─────────────────────────────────────────────────────

#[test]
fn missing_file_is_a_metadata_error() {
    let result = FfmpegBackend::new().video_info(Path::new("this_file_does_not_exist.mp4"));
    assert!(matches!(result, Err(FramezipError::Metadata { .. })));
}

#[test]
fn garbage_file_is_a_metadata_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("invalid.mp4");
    std::fs::write(&path, b"this is not a media file").unwrap();

    let result = FfmpegBackend::new().video_info(&path);
    assert!(matches!(result, Err(FramezipError::Metadata { .. })));
}

#[test]
fn fixture_metadata() {
    if !fixture_available() {
        return;
    }

    let metadata = FfmpegBackend::new()
        .video_info(Path::new(sample_video_path()))
        .expect("Failed to probe fixture");

    let seconds = metadata.duration.as_secs_f64();
    assert!((4.5..=5.5).contains(&seconds), "duration {seconds}");
    let rate = metadata.frames_per_second.expect("Frame rate should be known");
    assert!((rate - 30.0).abs() < 0.5, "frame rate {rate}");
    assert_eq!(metadata.dimensions, Some((320, 240)));
}

// ── Sampling ───────────────────────────────────────────────────────

#[test]
fn fixture_converts_at_requested_rate() {
    if !fixture_available() {
        return;
    }

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let store = Arc::new(DiskStore::new(directory.path()));
    let engine = ConversionEngine::new(Arc::new(FfmpegBackend::new()), store);
    let config = SamplingConfig::new().with_frames_per_second(2.0);

    let conversion = engine
        .convert_blocking(
            &VideoSource::from_path(sample_video_path()),
            &config,
            &ProgressReporter::detached(OperationType::Conversion),
            &CancellationToken::new(),
        )
        .expect("Conversion failed");

    assert!(conversion.expected_frames >= 9);
    assert!(!conversion.frames.is_empty());
    assert!(conversion.frames.len() as u64 <= conversion.expected_frames);
    let first = image::open(&conversion.frames[0].path).expect("Failed to decode frame");
    assert_eq!(first.dimensions(), (320, 240));
}

#[test]
fn fixture_conversion_is_deterministic() {
    if !fixture_available() {
        return;
    }

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let store = Arc::new(DiskStore::new(directory.path()));
    let engine = ConversionEngine::new(Arc::new(FfmpegBackend::new()), store);
    let source = VideoSource::from_path(sample_video_path());
    let convert = || {
        engine
            .convert_blocking(
                &source,
                &SamplingConfig::new(),
                &ProgressReporter::detached(OperationType::Conversion),
                &CancellationToken::new(),
            )
            .expect("Conversion failed")
    };

    let first = convert();
    let second = convert();

    assert_eq!(first.frames.len(), second.frames.len());
    for (left, right) in first.frames.iter().zip(&second.frames) {
        assert_eq!(
            std::fs::read(&left.path).unwrap(),
            std::fs::read(&right.path).unwrap()
        );
    }
}

#[test]
fn fixture_byte_source_converts() {
    if !fixture_available() {
        return;
    }

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let engine = ConversionEngine::new(
        Arc::new(FfmpegBackend::new()),
        Arc::new(DiskStore::new(directory.path())),
    );
    let data = std::fs::read(sample_video_path()).unwrap();

    let conversion = engine
        .convert_blocking(
            &VideoSource::from_bytes("dropped.mp4", data),
            &SamplingConfig::new(),
            &ProgressReporter::detached(OperationType::Conversion),
            &CancellationToken::new(),
        )
        .expect("Conversion failed");

    assert!(!conversion.frames.is_empty());
}

#[tokio::test]
async fn fixture_full_session() {
    if !fixture_available() {
        return;
    }

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let stores = directory.path().join("stores");
    let mut session = Session::new(
        Arc::new(FfmpegBackend::new()),
        Arc::new(DiskStore::new(&stores)),
    );

    session
        .select_source(VideoSource::from_path(sample_video_path()))
        .await
        .expect("Failed to select fixture");
    let produced = session.start_conversion().await.expect("Conversion failed");
    let archive = session
        .export(directory.path().join("sample_frames.zip"))
        .await
        .expect("Export failed");

    assert_eq!(archive.entries as u64, produced);
    assert!(produced <= 5);
    assert_eq!(std::fs::read_dir(&stores).unwrap().count(), 0);
}
