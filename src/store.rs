//! Temporary artifact storage.
//!
//! Every conversion writes its frames into a fresh working directory owned
//! by a [`TempStoreHandle`]. The directory lives until the session releases
//! it: after a successful export, on cancellation, or when the conversion
//! is abandoned.
//!
//! [`ArtifactStore`] is the seam between the engines and the filesystem.
//! [`DiskStore`] is the real implementation; tests wrap it to count
//! `create` and `release` calls.
//!
//! Frames are written to a `.part` file and renamed into place, so
//! [`ArtifactStore::list`] never sees a partially written frame.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageFormat};
use uuid::Uuid;

use crate::error::FramezipError;

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";
const PARTIAL_SUFFIX: &str = ".part";
const STORE_PREFIX: &str = "store-";

/// A live temporary store: its id and working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempStoreHandle {
    id: Uuid,
    directory: PathBuf,
}

impl TempStoreHandle {
    /// Unique id of this store.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The working directory holding this store's frames.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// One extracted frame inside a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameArtifact {
    /// Zero-based position in temporal order.
    pub index: u64,
    /// Location of the PNG file.
    pub path: PathBuf,
}

impl FrameArtifact {
    /// The file name used for frame `index`, e.g. `frame_00007.png`.
    pub fn file_name_for(index: u64) -> String {
        format!("{FRAME_PREFIX}{index:05}.{FRAME_EXTENSION}")
    }

    /// This frame's file name.
    pub fn file_name(&self) -> String {
        Self::file_name_for(self.index)
    }

    /// Parse a frame index back out of a file name.
    fn parse_index(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(FRAME_PREFIX)?
            .strip_suffix(FRAME_EXTENSION)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }
}

/// Storage for extracted frames.
///
/// Implementations must be [`Send`] and [`Sync`]; engines call them from
/// blocking worker threads.
pub trait ArtifactStore: Send + Sync {
    /// Allocate a fresh, uniquely named working directory.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Resource`] if storage is unavailable.
    fn create(&self) -> Result<TempStoreHandle, FramezipError>;

    /// Write frame `index` into the store and return its artifact.
    ///
    /// The frame only becomes visible to [`list`](Self::list) once it has
    /// been completely written.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Resource`] if the frame cannot be written.
    fn write_frame(
        &self,
        handle: &TempStoreHandle,
        index: u64,
        image: &DynamicImage,
    ) -> Result<FrameArtifact, FramezipError>;

    /// The fully written frames in the store, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Resource`] if the store has been released
    /// or cannot be read.
    fn list(&self, handle: &TempStoreHandle) -> Result<Vec<FrameArtifact>, FramezipError>;

    /// Delete the store's directory and everything in it.
    ///
    /// Idempotent: releasing an already released store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Cleanup`] if the directory exists but cannot
    /// be removed.
    fn release(&self, handle: &TempStoreHandle) -> Result<(), FramezipError>;
}

/// An [`ArtifactStore`] that keeps each store in a directory under `root`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Stores will be created as subdirectories of `root`.
    ///
    /// `root` is created on first use.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// A store rooted at `<system temp dir>/framezip`.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("framezip"))
    }

    /// The directory stores are created in.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for DiskStore {
    fn create(&self) -> Result<TempStoreHandle, FramezipError> {
        fs::create_dir_all(&self.root).map_err(|error| {
            FramezipError::Resource(format!("cannot create {}: {error}", self.root.display()))
        })?;

        let id = Uuid::new_v4();
        let directory = self.root.join(format!("{STORE_PREFIX}{id}"));
        fs::create_dir(&directory).map_err(|error| {
            FramezipError::Resource(format!("cannot create {}: {error}", directory.display()))
        })?;

        log::debug!("Created temporary store {}", directory.display());
        Ok(TempStoreHandle { id, directory })
    }

    fn write_frame(
        &self,
        handle: &TempStoreHandle,
        index: u64,
        image: &DynamicImage,
    ) -> Result<FrameArtifact, FramezipError> {
        let file_name = FrameArtifact::file_name_for(index);
        let path = handle.directory.join(&file_name);
        let partial = handle.directory.join(format!("{file_name}{PARTIAL_SUFFIX}"));

        image
            .save_with_format(&partial, ImageFormat::Png)
            .map_err(|error| {
                let _ = fs::remove_file(&partial);
                FramezipError::Resource(format!("cannot write {}: {error}", partial.display()))
            })?;
        fs::rename(&partial, &path).map_err(|error| {
            let _ = fs::remove_file(&partial);
            FramezipError::Resource(format!("cannot write {}: {error}", path.display()))
        })?;

        Ok(FrameArtifact { index, path })
    }

    fn list(&self, handle: &TempStoreHandle) -> Result<Vec<FrameArtifact>, FramezipError> {
        let entries = fs::read_dir(&handle.directory).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                FramezipError::Resource(format!("store {} has been released", handle.id))
            } else {
                FramezipError::Resource(format!(
                    "cannot read {}: {error}",
                    handle.directory.display()
                ))
            }
        })?;

        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(index) = file_name.to_str().and_then(FrameArtifact::parse_index) else {
                continue;
            };
            frames.push(FrameArtifact {
                index,
                path: entry.path(),
            });
        }

        frames.sort_by_key(|frame| frame.index);
        Ok(frames)
    }

    fn release(&self, handle: &TempStoreHandle) -> Result<(), FramezipError> {
        match fs::remove_dir_all(&handle.directory) {
            Ok(()) => {
                log::debug!("Released temporary store {}", handle.directory.display());
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(FramezipError::Cleanup {
                path: handle.directory.clone(),
                reason: error.to_string(),
            }),
        }
    }
}

