//! # framezip
//!
//! Sample still frames from a video at a fixed rate, preview them, and
//! package them into a ZIP archive.
//!
//! The crate is built around a [`Session`] that walks one video through
//! selection, configuration, conversion, preview and export. The session
//! owns the temporary directory frames are written to and guarantees it is
//! released on every exit path, including failures and cancellation.
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # async fn example() -> Result<(), framezip::FramezipError> {
//! use std::sync::Arc;
//!
//! use framezip::{DiskStore, FfmpegBackend, Session, VideoSource};
//!
//! let mut session = Session::new(
//!     Arc::new(FfmpegBackend::new()),
//!     Arc::new(DiskStore::in_temp_dir()),
//! );
//! session.select_source(VideoSource::from_path("input.mp4")).await?;
//! session.set_frames_per_second(2.0)?;
//! session.start_conversion().await?;
//! session.export("input_frames.zip").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! - **Progress** ([`progress`]): per-invocation channels delivering
//!   monotonic percentages, plus [`CancellationToken`]
//! - **Temporary storage** ([`store`]): one working directory per
//!   conversion, released explicitly
//! - **Conversion** ([`conversion`]): samples frames through a
//!   [`MediaBackend`] into a fresh store
//! - **Export** ([`export`]): packs a store into a ZIP archive, replacing
//!   the destination atomically
//! - **Session** ([`session`]): the state machine tying them together
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` (default) | [`FfmpegBackend`], decoding through FFmpeg; required by the `framezip` binary |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries installed on
//! your system.

pub mod backend;
pub mod configuration;
pub mod conversion;
pub mod error;
pub mod export;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod metadata;
pub mod progress;
pub mod session;
pub mod source;
pub mod store;

pub use backend::{FrameSink, MediaBackend, SampleRequest};
pub use configuration::{DEFAULT_FRAMES_PER_SECOND, Preferences, SamplingConfig};
pub use conversion::{Conversion, ConversionEngine};
pub use error::FramezipError;
pub use export::{ArchiveResult, ExportEngine};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, set_ffmpeg_log_level};
pub use metadata::{FrameCount, VideoMetadata, expected_frame_count};
pub use progress::{
    CancellationToken, OperationType, ProgressCallback, ProgressInfo, ProgressReporter,
    ProgressStream, ProgressSubscription, progress_channel,
};
pub use session::{
    Configuring, ConversionStep, Finished, Previewing, Session, SessionHandle, SessionState,
};
pub use source::{MaterializedSource, SUPPORTED_EXTENSIONS, VideoSource};
pub use store::{ArtifactStore, DiskStore, FrameArtifact, TempStoreHandle};
