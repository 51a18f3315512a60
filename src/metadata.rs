//! Video metadata and frame-count arithmetic.
//!
//! [`VideoMetadata`] is what a [`MediaBackend`](crate::MediaBackend) reports
//! when probing a source. The only field the pipeline depends on is the
//! duration, from which the expected number of sampled frames is derived.
//! That number is an estimate; the count actually produced by a conversion
//! replaces it once known (see [`FrameCount`]).

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

/// Metadata for a video source.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use framezip::VideoMetadata;
///
/// let metadata = VideoMetadata::new(Duration::from_secs(10)).with_frame_rate(25.0);
/// assert_eq!(metadata.expected_frame_count(2.0), 20);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Total duration of the video.
    pub duration: Duration,
    /// Native frame rate, if the backend could determine it.
    pub frames_per_second: Option<f64>,
    /// Frame width and height in pixels, if known.
    pub dimensions: Option<(u32, u32)>,
}

impl VideoMetadata {
    /// Metadata carrying only a duration.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            frames_per_second: None,
            dimensions: None,
        }
    }

    /// Set the native frame rate.
    pub fn with_frame_rate(mut self, frames_per_second: f64) -> Self {
        self.frames_per_second = Some(frames_per_second);
        self
    }

    /// Set the frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// Native frame count estimated from duration and frame rate.
    pub fn native_frame_count(&self) -> Option<u64> {
        self.frames_per_second
            .map(|fps| expected_frame_count(self.duration, fps))
    }

    /// Number of frames a conversion at `frames_per_second` should produce.
    pub fn expected_frame_count(&self, frames_per_second: f64) -> u64 {
        expected_frame_count(self.duration, frames_per_second)
    }
}

/// `floor(duration * frames_per_second)`.
///
/// Returns 0 for a non-positive or non-finite rate.
pub fn expected_frame_count(duration: Duration, frames_per_second: f64) -> u64 {
    if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
        return 0;
    }
    (duration.as_secs_f64() * frames_per_second).floor() as u64
}

/// A frame count that is either a pre-conversion estimate or a measured
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    /// Derived from metadata before conversion. Display-only.
    Estimated(u64),
    /// The number of frames a conversion actually produced.
    Actual(u64),
}

impl FrameCount {
    /// The count regardless of provenance.
    pub fn value(self) -> u64 {
        match self {
            FrameCount::Estimated(count) | FrameCount::Actual(count) => count,
        }
    }

    /// Returns `true` for a pre-conversion estimate.
    pub fn is_estimate(self) -> bool {
        matches!(self, FrameCount::Estimated(_))
    }
}

impl Display for FrameCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FrameCount::Estimated(count) => write!(f, "~{count}"),
            FrameCount::Actual(count) => write!(f, "{count}"),
        }
    }
}
