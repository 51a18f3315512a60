//! The conversion engine.
//!
//! [`ConversionEngine`] turns a [`VideoSource`] into an ordered sequence of
//! PNG frames inside a newly created temporary store. It probes the source,
//! asks the [`MediaBackend`] to sample it, writes every frame it receives,
//! and reports progress as `frames written / frames expected`.
//!
//! On any failure (including cancellation) the engine releases the store it
//! created before returning, so a caller only ever holds a handle for a
//! complete conversion.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # async fn example() -> Result<(), framezip::FramezipError> {
//! use std::sync::Arc;
//!
//! use framezip::{
//!     CancellationToken, ConversionEngine, DiskStore, FfmpegBackend, OperationType,
//!     ProgressReporter, SamplingConfig, VideoSource,
//! };
//!
//! let engine = ConversionEngine::new(
//!     Arc::new(FfmpegBackend::new()),
//!     Arc::new(DiskStore::in_temp_dir()),
//! );
//! let conversion = engine
//!     .convert(
//!         VideoSource::from_path("input.mp4"),
//!         SamplingConfig::new().with_frames_per_second(2.0),
//!         ProgressReporter::detached(OperationType::Conversion),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} frames in {}", conversion.frames.len(), conversion.store.directory().display());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;

use crate::{
    backend::{MediaBackend, SampleRequest},
    configuration::SamplingConfig,
    error::FramezipError,
    progress::{CancellationToken, ProgressReporter},
    source::VideoSource,
    store::{ArtifactStore, FrameArtifact, TempStoreHandle},
};

/// The result of a successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The store holding the frames. The caller owns its release.
    pub store: TempStoreHandle,
    /// Frames in index order; indices are `0..frames.len()`.
    pub frames: Vec<FrameArtifact>,
    /// The count predicted from metadata before sampling.
    pub expected_frames: u64,
}

/// Samples frames from a video into a fresh temporary store.
#[derive(Clone)]
pub struct ConversionEngine {
    backend: Arc<dyn MediaBackend>,
    store: Arc<dyn ArtifactStore>,
}

impl ConversionEngine {
    /// An engine that decodes with `backend` and writes into `store`.
    pub fn new(backend: Arc<dyn MediaBackend>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { backend, store }
    }

    /// Run a conversion on a blocking thread and await its result.
    ///
    /// Dropping the returned future cancels `cancellation`; the background
    /// thread then stops at the next frame and releases its store.
    ///
    /// # Errors
    ///
    /// See [`convert_blocking`](Self::convert_blocking).
    pub async fn convert(
        &self,
        source: VideoSource,
        config: SamplingConfig,
        progress: ProgressReporter,
        cancellation: CancellationToken,
    ) -> Result<Conversion, FramezipError> {
        let engine = self.clone();
        let guard = CancelOnDrop::new(cancellation.clone());
        let task = tokio::task::spawn_blocking(move || {
            engine.convert_blocking(&source, &config, &progress, &cancellation)
        });
        let result = task.await.unwrap_or_else(|error| {
            Err(FramezipError::Conversion(format!(
                "conversion task failed: {error}"
            )))
        });
        guard.disarm();
        result
    }

    /// Run a conversion on the current thread.
    ///
    /// # Errors
    ///
    /// - [`FramezipError::InvalidConfig`] if `config` is invalid.
    /// - [`FramezipError::Metadata`] if the source cannot be probed.
    /// - [`FramezipError::Resource`] if no store can be created or written.
    /// - [`FramezipError::Conversion`] if sampling fails or yields no frames.
    /// - [`FramezipError::Cancelled`] if `cancellation` fires.
    pub fn convert_blocking(
        &self,
        source: &VideoSource,
        config: &SamplingConfig,
        progress: &ProgressReporter,
        cancellation: &CancellationToken,
    ) -> Result<Conversion, FramezipError> {
        config.validate()?;
        source.validate()?;
        let input = source.materialize()?;

        let metadata = self
            .backend
            .video_info(input.path())
            .map_err(|error| match error {
                FramezipError::Metadata { .. } => error,
                other => FramezipError::Metadata {
                    name: source.display_name(),
                    reason: other.to_string(),
                },
            })?;
        let expected_frames = metadata.expected_frame_count(config.frames_per_second);

        log::debug!(
            "Converting {} at {} fps: {:?} long, expecting {expected_frames} frames",
            source.display_name(),
            config.frames_per_second,
            metadata.duration,
        );

        let store = self.store.create()?;
        let sampled = self.sample_into(
            &store,
            input.path(),
            config,
            expected_frames,
            progress,
            cancellation,
        );

        match sampled {
            Ok(frames) => {
                progress.finish();
                log::info!(
                    "Converted {} into {} frames (expected {expected_frames})",
                    source.display_name(),
                    frames.len(),
                );
                Ok(Conversion {
                    store,
                    frames,
                    expected_frames,
                })
            }
            Err(error) => {
                if let Err(cleanup) = self.store.release(&store) {
                    log::warn!("{cleanup}");
                }
                Err(error)
            }
        }
    }

    fn sample_into(
        &self,
        store: &TempStoreHandle,
        input: &Path,
        config: &SamplingConfig,
        expected_frames: u64,
        progress: &ProgressReporter,
        cancellation: &CancellationToken,
    ) -> Result<Vec<FrameArtifact>, FramezipError> {
        let request = SampleRequest {
            frames_per_second: config.frames_per_second,
            frame_limit: expected_frames,
            cancellation,
            progress,
        };

        let mut frames: Vec<FrameArtifact> = Vec::new();
        progress.report_items(0, Some(expected_frames));

        self.backend
            .sample_frames(input, &request, &mut |image: DynamicImage| {
                request.check_cancelled()?;
                let index = frames.len() as u64;
                let artifact = self.store.write_frame(store, index, &image)?;
                frames.push(artifact);
                progress.report_items(frames.len() as u64, Some(expected_frames));
                Ok(())
            })
            .map_err(into_conversion_error)?;
        request.check_cancelled()?;

        if frames.is_empty() {
            return Err(FramezipError::Conversion(
                "no frames were extracted".to_string(),
            ));
        }

        // The store must hold exactly the frames we wrote, contiguous from 0.
        let listed = self.store.list(store)?;
        let contiguous = listed.len() == frames.len()
            && listed
                .iter()
                .enumerate()
                .all(|(position, frame)| frame.index == position as u64);
        if !contiguous {
            return Err(FramezipError::Conversion(format!(
                "store holds {} frames after writing {}",
                listed.len(),
                frames.len()
            )));
        }

        Ok(frames)
    }
}

/// Errors the backend surfaces as-is; anything else becomes a conversion error.
fn into_conversion_error(error: FramezipError) -> FramezipError {
    match error {
        FramezipError::Cancelled
        | FramezipError::Conversion(_)
        | FramezipError::Resource(_) => error,
        other => FramezipError::Conversion(other.to_string()),
    }
}

/// Cancels the wrapped token if dropped before [`disarm`](Self::disarm).
pub(crate) struct CancelOnDrop(Option<CancellationToken>);

impl CancelOnDrop {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self(Some(token))
    }

    pub(crate) fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = &self.0 {
            token.cancel();
        }
    }
}
