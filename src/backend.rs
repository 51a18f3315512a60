//! The media backend boundary.
//!
//! Decoding video is not done by this crate's pipeline directly; it is
//! delegated to a [`MediaBackend`]. The backend probes sources and samples
//! frames at a fixed rate, handing each decoded frame to a sink supplied by
//! the conversion engine. The engine owns indexing, storage, and progress.
//!
//! With the `ffmpeg` feature (on by default),
//! [`FfmpegBackend`](crate::FfmpegBackend) implements this trait on top of
//! `ffmpeg-next`.

use std::path::Path;
use std::time::Duration;

use image::DynamicImage;

use crate::{
    error::FramezipError,
    metadata::VideoMetadata,
    progress::{CancellationToken, ProgressReporter},
};

/// Parameters for one sampling run.
pub struct SampleRequest<'a> {
    /// Frames to sample per second of video.
    pub frames_per_second: f64,
    /// Number of frames the metadata predicts; backends must not emit more.
    pub frame_limit: u64,
    /// Checked between frames; a backend should stop and return
    /// [`FramezipError::Cancelled`] once it is set.
    pub cancellation: &'a CancellationToken,
    /// For backends that can only report coarse progress. Frame-granular
    /// progress is reported by the engine from sink calls.
    pub progress: &'a ProgressReporter,
}

impl SampleRequest<'_> {
    /// Presentation time of sample `index`: `index / frames_per_second`.
    pub fn timestamp(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.frames_per_second)
    }

    /// Return [`FramezipError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), FramezipError> {
        if self.cancellation.is_cancelled() {
            Err(FramezipError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives sampled frames in temporal order.
pub type FrameSink<'a> = dyn FnMut(DynamicImage) -> Result<(), FramezipError> + 'a;

/// A native media backend.
///
/// Implementations must be [`Send`] and [`Sync`]: they are shared between
/// the session and the blocking threads engines run on.
pub trait MediaBackend: Send + Sync {
    /// Probe the video at `input`.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Metadata`] if the file cannot be read.
    fn video_info(&self, input: &Path) -> Result<VideoMetadata, FramezipError>;

    /// Sample frames at `1 / request.frames_per_second` second intervals
    /// from the start of the video, passing each to `sink` in order.
    ///
    /// At most `request.frame_limit` frames are emitted; fewer is allowed
    /// when the stream ends early. An error from `sink` must stop sampling
    /// and be returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Conversion`] if decoding fails, or
    /// [`FramezipError::Cancelled`] if the request was cancelled.
    fn sample_frames(
        &self,
        input: &Path,
        request: &SampleRequest<'_>,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), FramezipError>;
}
