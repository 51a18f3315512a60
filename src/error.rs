//! Error types for the `framezip` crate.
//!
//! This module defines [`FramezipError`], the unified error type returned by
//! all fallible operations in the crate. Variants follow the life of a
//! conversion: reading the source, sampling frames, holding them in
//! temporary storage, packing the archive, and cleaning up afterwards.

use std::{io::Error as IoError, path::PathBuf};

#[cfg(feature = "ffmpeg")]
use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

use crate::session::ConversionStep;

/// The unified error type for all `framezip` operations.
///
/// Every message is meant to be shown to a user as-is. Variants carry the
/// failing path or the backend's reason so the caller does not need extra
/// context to explain what went wrong.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramezipError {
    /// The video source could not be read or probed.
    #[error("Failed to read video metadata from {name}: {reason}")]
    Metadata {
        /// Display name of the source (file name or path).
        name: String,
        /// Underlying reason reported by the backend.
        reason: String,
    },

    /// The source is not one of the supported video types.
    #[error("Unsupported video source {name}: expected an mp4, mov, avi or mkv file")]
    UnsupportedSource {
        /// Display name of the rejected source.
        name: String,
    },

    /// The sampling configuration is invalid.
    #[error("Invalid sampling configuration: {0}")]
    InvalidConfig(String),

    /// Frame sampling failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Temporary storage could not be allocated or read.
    #[error("Temporary storage unavailable: {0}")]
    Resource(String),

    /// The archive could not be written.
    #[error("Export failed: {0}")]
    Export(String),

    /// A temporary directory could not be removed.
    ///
    /// Cleanup is best-effort: the session logs this error and moves on.
    #[error("Failed to clean up {path}: {reason}")]
    Cleanup {
        /// Directory that could not be removed.
        path: PathBuf,
        /// Underlying I/O reason.
        reason: String,
    },

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// The requested action is not valid in the session's current step.
    #[error("Cannot {action} while the session is in the {step} step")]
    InvalidTransition {
        /// What the caller tried to do.
        action: &'static str,
        /// The step the session was in.
        step: ConversionStep,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl FramezipError {
    /// Returns `true` if this error is a user-requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FramezipError::Cancelled)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<FfmpegError> for FramezipError {
    fn from(error: FfmpegError) -> Self {
        FramezipError::Conversion(format!("FFmpeg error: {error}"))
    }
}
