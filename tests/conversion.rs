//! Conversion engine integration tests, run against a scripted backend.

mod common;

use std::{fs, sync::Arc, time::Duration};

use framezip::{
    ArtifactStore, CancellationToken, ConversionEngine, FramezipError, OperationType,
    ProgressReporter, ProgressSubscription, SamplingConfig, VideoSource,
};

use common::{
    CountingStore, RecordingProgress, ScriptedBackend, assert_progress_completed,
    placeholder_video,
};

struct Fixture {
    _directory: tempfile::TempDir,
    store: Arc<CountingStore>,
    source: VideoSource,
}

fn fixture() -> Fixture {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let store = CountingStore::new(&directory.path().join("stores"));
    let source = VideoSource::from_path(placeholder_video(directory.path(), "clip.mp4"));
    Fixture {
        _directory: directory,
        store,
        source,
    }
}

fn engine(backend: ScriptedBackend, store: &Arc<CountingStore>) -> ConversionEngine {
    ConversionEngine::new(Arc::new(backend), store.clone())
}

fn detached() -> ProgressReporter {
    ProgressReporter::detached(OperationType::Conversion)
}

// ── Successful conversion ──────────────────────────────────────────

#[test]
fn conversion_produces_contiguous_frames() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(10)), &fixture.store);
    let config = SamplingConfig::new().with_frames_per_second(2.0);

    let conversion = engine
        .convert_blocking(&fixture.source, &config, &detached(), &CancellationToken::new())
        .expect("Conversion failed");

    assert_eq!(conversion.expected_frames, 20);
    assert_eq!(conversion.frames.len(), 20);
    for (position, frame) in conversion.frames.iter().enumerate() {
        assert_eq!(frame.index, position as u64);
        assert!(frame.path.starts_with(conversion.store.directory()));
        assert!(frame.path.is_file());
    }
    assert_eq!(
        fixture.store.list(&conversion.store).unwrap(),
        conversion.frames
    );
    assert_eq!(fixture.store.creates(), 1);
    assert_eq!(fixture.store.live(), 1);
}

#[test]
fn actual_frame_count_is_reported_separately_from_estimate() {
    let fixture = fixture();
    let backend = ScriptedBackend::new(Duration::from_secs(10)).with_actual_frames(19);
    let engine = engine(backend, &fixture.store);
    let config = SamplingConfig::new().with_frames_per_second(2.0);

    let conversion = engine
        .convert_blocking(&fixture.source, &config, &detached(), &CancellationToken::new())
        .expect("Conversion failed");

    assert_eq!(conversion.expected_frames, 20);
    assert_eq!(conversion.frames.len(), 19);
}

#[test]
fn conversion_reports_monotonic_progress_ending_at_100() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(8)), &fixture.store);
    let recording = RecordingProgress::new();
    let subscription = ProgressSubscription::new(recording.clone(), OperationType::Conversion);

    engine
        .convert_blocking(
            &fixture.source,
            &SamplingConfig::new(),
            &subscription.reporter(),
            &CancellationToken::new(),
        )
        .expect("Conversion failed");

    let percentages = recording.percentages(OperationType::Conversion);
    assert_progress_completed(&percentages);
    assert_eq!(percentages.first(), Some(&0));
    assert!(recording.infos().iter().all(|info| info.total == Some(8)));
}

#[test]
fn repeated_conversions_are_independent_and_deterministic() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(5)), &fixture.store);
    let config = SamplingConfig::new().with_frames_per_second(1.5);

    let first = engine
        .convert_blocking(&fixture.source, &config, &detached(), &CancellationToken::new())
        .expect("First conversion failed");
    let second = engine
        .convert_blocking(&fixture.source, &config, &detached(), &CancellationToken::new())
        .expect("Second conversion failed");

    assert_ne!(first.store.id(), second.store.id());
    assert_eq!(first.frames.len(), second.frames.len());
    for (left, right) in first.frames.iter().zip(&second.frames) {
        assert_eq!(left.index, right.index);
        assert_eq!(fs::read(&left.path).unwrap(), fs::read(&right.path).unwrap());
    }
}

#[test]
fn byte_sources_are_converted() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(3)), &fixture.store);
    let source = VideoSource::from_bytes("dropped.mkv", vec![0_u8; 32]);

    let conversion = engine
        .convert_blocking(&source, &SamplingConfig::new(), &detached(), &CancellationToken::new())
        .expect("Conversion failed");

    assert_eq!(conversion.frames.len(), 3);
}

#[tokio::test]
async fn async_conversion_runs_on_blocking_pool() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(4)), &fixture.store);

    let conversion = engine
        .convert(
            fixture.source.clone(),
            SamplingConfig::new(),
            detached(),
            CancellationToken::new(),
        )
        .await
        .expect("Conversion failed");

    assert_eq!(conversion.frames.len(), 4);
    fixture.store.release(&conversion.store).unwrap();
    fixture.store.assert_balanced();
}

// ── Failures ───────────────────────────────────────────────────────

#[test]
fn backend_failure_releases_partial_store() {
    let fixture = fixture();
    let backend = ScriptedBackend::new(Duration::from_secs(10)).failing_at(4);
    let engine = engine(backend, &fixture.store);
    let recording = RecordingProgress::new();
    let subscription = ProgressSubscription::new(recording.clone(), OperationType::Conversion);

    let result = engine.convert_blocking(
        &fixture.source,
        &SamplingConfig::new(),
        &subscription.reporter(),
        &CancellationToken::new(),
    );

    match result {
        Err(FramezipError::Conversion(message)) => {
            assert!(message.contains("scripted failure"), "{message}");
        }
        other => panic!("Expected Conversion error, got: {other:?}"),
    }
    assert_eq!(fixture.store.creates(), 1);
    fixture.store.assert_balanced();
    assert!(!recording.percentages(OperationType::Conversion).contains(&100));
}

#[test]
fn unreadable_metadata_fails_before_creating_a_store() {
    let fixture = fixture();
    let engine = engine(
        ScriptedBackend::new(Duration::from_secs(10)).unreadable(),
        &fixture.store,
    );

    let result = engine.convert_blocking(
        &fixture.source,
        &SamplingConfig::new(),
        &detached(),
        &CancellationToken::new(),
    );

    assert!(matches!(result, Err(FramezipError::Metadata { .. })));
    assert_eq!(fixture.store.creates(), 0);
}

#[test]
fn zero_frames_is_a_conversion_error() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_millis(400)), &fixture.store);

    let result = engine.convert_blocking(
        &fixture.source,
        &SamplingConfig::new(),
        &detached(),
        &CancellationToken::new(),
    );

    match result {
        Err(FramezipError::Conversion(message)) => {
            assert!(message.contains("no frames"), "{message}");
        }
        other => panic!("Expected Conversion error, got: {other:?}"),
    }
    fixture.store.assert_balanced();
}

#[test]
fn cancelled_conversion_releases_store() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(10)), &fixture.store);
    let token = CancellationToken::new();
    token.cancel();

    let result =
        engine.convert_blocking(&fixture.source, &SamplingConfig::new(), &detached(), &token);

    assert!(result.unwrap_err().is_cancelled());
    fixture.store.assert_balanced();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_mid_run_stops_writing() {
    let fixture = fixture();
    let backend = ScriptedBackend::new(Duration::from_secs(100))
        .with_frame_delay(Duration::from_millis(10));
    let engine = engine(backend, &fixture.store);
    let token = CancellationToken::new();

    let running = tokio::spawn({
        let engine = engine.clone();
        let source = fixture.source.clone();
        let token = token.clone();
        async move {
            engine
                .convert(source, SamplingConfig::new(), detached(), token)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let result = running.await.expect("Conversion task panicked");
    assert!(result.unwrap_err().is_cancelled());
    fixture.store.assert_balanced();
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(10)), &fixture.store);

    let result = engine.convert_blocking(
        &fixture.source,
        &SamplingConfig::new().with_frames_per_second(0.0),
        &detached(),
        &CancellationToken::new(),
    );

    assert!(matches!(result, Err(FramezipError::InvalidConfig(_))));
    assert_eq!(fixture.store.creates(), 0);
}

#[test]
fn unsupported_source_is_rejected() {
    let fixture = fixture();
    let engine = engine(ScriptedBackend::new(Duration::from_secs(10)), &fixture.store);

    let result = engine.convert_blocking(
        &VideoSource::from_bytes("slides.pdf", vec![1_u8]),
        &SamplingConfig::new(),
        &detached(),
        &CancellationToken::new(),
    );

    assert!(matches!(
        result,
        Err(FramezipError::UnsupportedSource { .. })
    ));
}

#[test]
fn unavailable_storage_is_a_resource_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let store = CountingStore::unavailable(directory.path());
    let source = VideoSource::from_path(placeholder_video(directory.path(), "clip.mp4"));
    let engine = engine(ScriptedBackend::new(Duration::from_secs(10)), &store);

    let result = engine.convert_blocking(
        &source,
        &SamplingConfig::new(),
        &detached(),
        &CancellationToken::new(),
    );

    assert!(matches!(result, Err(FramezipError::Resource(_))));
}
