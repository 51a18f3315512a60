//! Video sources.
//!
//! A [`VideoSource`] is either a file on disk or raw bytes with a name (for
//! example a dropped file that has not been saved anywhere). Backends only
//! read from paths, so byte sources are written to a scratch file for the
//! duration of an operation via [`VideoSource::materialize`].

use std::{
    ffi::OsStr,
    fmt::{Debug, Formatter, Result as FmtResult},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::NamedTempFile;

use crate::error::FramezipError;

/// File extensions accepted as video sources (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

/// The video to sample frames from. Immutable once selected.
#[derive(Clone)]
pub enum VideoSource {
    /// A video file on disk.
    Path(PathBuf),
    /// Raw video content with its original file name.
    Bytes {
        /// File name the content came with, used for type checks and naming.
        name: String,
        /// The encoded video.
        data: Arc<[u8]>,
    },
}

impl Debug for VideoSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VideoSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            VideoSource::Bytes { name, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl VideoSource {
    /// A source backed by a file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        VideoSource::Path(path.as_ref().to_path_buf())
    }

    /// A source backed by in-memory content.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        VideoSource::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human-readable name: the file name for paths, the given name for bytes.
    pub fn display_name(&self) -> String {
        match self {
            VideoSource::Path(path) => path
                .file_name()
                .unwrap_or(path.as_os_str())
                .to_string_lossy()
                .into_owned(),
            VideoSource::Bytes { name, .. } => name.clone(),
        }
    }

    /// The name without its extension, e.g. `"clip"` for `"clip.mp4"`.
    pub fn stem(&self) -> String {
        let name = self.display_name();
        match Path::new(&name).file_stem().and_then(OsStr::to_str) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => name,
        }
    }

    /// Lower-cased extension of the source's name.
    pub fn extension(&self) -> Option<String> {
        let name = self.display_name();
        Path::new(&name)
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
    }

    /// Returns `true` if the extension is one of [`SUPPORTED_EXTENSIONS`].
    pub fn is_supported(&self) -> bool {
        self.extension()
            .is_some_and(|extension| SUPPORTED_EXTENSIONS.contains(&extension.as_str()))
    }

    /// Check that the source is a supported video that can be read.
    ///
    /// # Errors
    ///
    /// - [`FramezipError::UnsupportedSource`] for an unknown file type.
    /// - [`FramezipError::Metadata`] for a missing file or empty content.
    pub fn validate(&self) -> Result<(), FramezipError> {
        if !self.is_supported() {
            return Err(FramezipError::UnsupportedSource {
                name: self.display_name(),
            });
        }

        match self {
            VideoSource::Path(path) if !path.is_file() => Err(FramezipError::Metadata {
                name: self.display_name(),
                reason: format!("{} does not exist or is not a file", path.display()),
            }),
            VideoSource::Bytes { data, .. } if data.is_empty() => Err(FramezipError::Metadata {
                name: self.display_name(),
                reason: "video content is empty".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Make the source readable from a path.
    ///
    /// Path sources are returned as-is. Byte sources are written to a
    /// scratch file that is deleted when the returned value is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Resource`] if the scratch file cannot be
    /// written.
    pub fn materialize(&self) -> Result<MaterializedSource, FramezipError> {
        match self {
            VideoSource::Path(path) => Ok(MaterializedSource::Borrowed(path.clone())),
            VideoSource::Bytes { data, .. } => {
                let suffix = self
                    .extension()
                    .map(|extension| format!(".{extension}"))
                    .unwrap_or_default();
                let mut file = tempfile::Builder::new()
                    .prefix("framezip-source-")
                    .suffix(&suffix)
                    .tempfile()
                    .map_err(|error| {
                        FramezipError::Resource(format!("cannot create scratch file: {error}"))
                    })?;
                file.write_all(data)
                    .and_then(|()| file.flush())
                    .map_err(|error| {
                        FramezipError::Resource(format!("cannot write scratch file: {error}"))
                    })?;
                log::debug!(
                    "Wrote {} bytes of {} to {}",
                    data.len(),
                    self.display_name(),
                    file.path().display()
                );
                Ok(MaterializedSource::Scratch(file))
            }
        }
    }
}

/// A source that can be opened by path. See [`VideoSource::materialize`].
#[derive(Debug)]
pub enum MaterializedSource {
    /// The original file.
    Borrowed(PathBuf),
    /// A scratch copy of byte content, removed on drop.
    Scratch(NamedTempFile),
}

impl MaterializedSource {
    /// Path the backend should read.
    pub fn path(&self) -> &Path {
        match self {
            MaterializedSource::Borrowed(path) => path,
            MaterializedSource::Scratch(file) => file.path(),
        }
    }
}
