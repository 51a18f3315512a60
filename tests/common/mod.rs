//! Collaborator doubles shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use framezip::{
    ArtifactStore, DiskStore, FrameArtifact, FrameSink, FramezipError, MediaBackend,
    OperationType, ProgressCallback, ProgressInfo, SampleRequest, TempStoreHandle,
    VideoMetadata,
};
use image::{DynamicImage, Rgb, RgbImage};
use uuid::Uuid;

// ── Scripted media backend ─────────────────────────────────────────

/// A backend that fabricates frames instead of decoding.
///
/// Frame `i` is a 4x4 image filled with `[i, 255 - i, 0]`, so output is
/// deterministic and each index is distinguishable.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    duration: Duration,
    actual_frames: Option<u64>,
    fail_at: Option<u64>,
    frame_delay: Duration,
    probe_delay: Duration,
    unreadable: bool,
}

impl ScriptedBackend {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            actual_frames: None,
            fail_at: None,
            frame_delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
            unreadable: false,
        }
    }

    /// Emit `count` frames instead of the full `frame_limit`.
    pub fn with_actual_frames(mut self, count: u64) -> Self {
        self.actual_frames = Some(count);
        self
    }

    /// Fail with a conversion error before emitting frame `index`.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Sleep before each frame.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Sleep before answering each metadata probe.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Fail every metadata probe.
    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    pub fn frame_image(index: u64) -> DynamicImage {
        let shade = (index % 256) as u8;
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([shade, 255 - shade, 0])))
    }
}

impl MediaBackend for ScriptedBackend {
    fn video_info(&self, input: &Path) -> Result<VideoMetadata, FramezipError> {
        if !self.probe_delay.is_zero() {
            std::thread::sleep(self.probe_delay);
        }
        if self.unreadable {
            return Err(FramezipError::Metadata {
                name: input.display().to_string(),
                reason: "scripted unreadable source".to_string(),
            });
        }
        Ok(VideoMetadata::new(self.duration)
            .with_frame_rate(25.0)
            .with_dimensions(4, 4))
    }

    fn sample_frames(
        &self,
        _input: &Path,
        request: &SampleRequest<'_>,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), FramezipError> {
        let count = self
            .actual_frames
            .unwrap_or(request.frame_limit)
            .min(request.frame_limit);

        for index in 0..count {
            request.check_cancelled()?;
            if self.fail_at == Some(index) {
                return Err(FramezipError::Conversion(format!(
                    "scripted failure at frame {index}"
                )));
            }
            if !self.frame_delay.is_zero() {
                std::thread::sleep(self.frame_delay);
            }
            sink(Self::frame_image(index))?;
        }
        Ok(())
    }
}

// ── Counting artifact store ────────────────────────────────────────

/// Wraps a [`DiskStore`] and records every create and release.
pub struct CountingStore {
    inner: DiskStore,
    creates: AtomicUsize,
    releases: AtomicUsize,
    live: Mutex<HashSet<Uuid>>,
    peak_live: AtomicUsize,
    list_delay: Mutex<Duration>,
    fail_create: bool,
}

impl CountingStore {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self::build(root, false))
    }

    /// A store whose `create` always fails with a resource error.
    pub fn unavailable(root: &Path) -> Arc<Self> {
        Arc::new(Self::build(root, true))
    }

    fn build(root: &Path, fail_create: bool) -> Self {
        Self {
            inner: DiskStore::new(root),
            creates: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
            peak_live: AtomicUsize::new(0),
            list_delay: Mutex::new(Duration::ZERO),
            fail_create,
        }
    }

    /// Sleep before every subsequent `list`.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Stores created.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Distinct stores released.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Stores created and not yet released.
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// The most stores that were ever live at once.
    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    /// Directories currently on disk under the root.
    pub fn directories_on_disk(&self) -> usize {
        match fs::read_dir(self.inner.root()) {
            Ok(entries) => entries.filter(|entry| entry.is_ok()).count(),
            Err(_) => 0,
        }
    }

    pub fn assert_balanced(&self) {
        assert_eq!(
            self.creates(),
            self.releases(),
            "every created store must be released"
        );
        assert_eq!(self.live(), 0);
        assert_eq!(self.directories_on_disk(), 0, "no orphaned directories");
    }
}

impl ArtifactStore for CountingStore {
    fn create(&self) -> Result<TempStoreHandle, FramezipError> {
        if self.fail_create {
            return Err(FramezipError::Resource("scripted: disk full".to_string()));
        }
        let handle = self.inner.create()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut live = self.live.lock().unwrap();
        live.insert(handle.id());
        self.peak_live.fetch_max(live.len(), Ordering::SeqCst);
        Ok(handle)
    }

    fn write_frame(
        &self,
        handle: &TempStoreHandle,
        index: u64,
        image: &DynamicImage,
    ) -> Result<FrameArtifact, FramezipError> {
        self.inner.write_frame(handle, index, image)
    }

    fn list(&self, handle: &TempStoreHandle) -> Result<Vec<FrameArtifact>, FramezipError> {
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.list(handle)
    }

    fn release(&self, handle: &TempStoreHandle) -> Result<(), FramezipError> {
        self.inner.release(handle)?;
        if self.live.lock().unwrap().remove(&handle.id()) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ── Recording progress callback ────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn infos(&self) -> Vec<ProgressInfo> {
        self.infos.lock().unwrap().clone()
    }

    pub fn percentages(&self, operation: OperationType) -> Vec<u8> {
        self.infos
            .lock()
            .unwrap()
            .iter()
            .filter(|info| info.operation == operation)
            .map(|info| info.percentage)
            .collect()
    }

    pub fn clear(&self) {
        self.infos.lock().unwrap().clear();
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

/// Assert percentages strictly increase and end with exactly one 100.
pub fn assert_progress_completed(percentages: &[u8]) {
    assert!(!percentages.is_empty(), "expected progress events");
    assert!(
        percentages.windows(2).all(|pair| pair[0] < pair[1]),
        "progress must increase: {percentages:?}"
    );
    assert_eq!(percentages.last(), Some(&100));
    assert_eq!(percentages.iter().filter(|&&value| value == 100).count(), 1);
}

// ── Fixtures ───────────────────────────────────────────────────────

/// Write a placeholder video file; scripted backends never read it.
pub fn placeholder_video(directory: &Path, name: &str) -> PathBuf {
    let path = directory.join(name);
    fs::write(&path, b"not really a video").expect("Failed to write placeholder video");
    path
}
