//! The export engine.
//!
//! [`ExportEngine`] packs every frame of a temporary store into one ZIP
//! archive, in index order, reporting progress as the share of frames
//! packed. It only reads the store; releasing it stays with the caller.
//!
//! The archive is assembled in a staging file next to the destination and
//! renamed over it once complete. An existing file at the destination is
//! therefore replaced atomically, and a failed or cancelled export leaves
//! it untouched.

use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    conversion::CancelOnDrop,
    error::FramezipError,
    progress::{CancellationToken, ProgressReporter},
    store::{ArtifactStore, TempStoreHandle},
};

/// The result of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    /// Where the archive was written.
    pub destination: PathBuf,
    /// Number of frames in the archive.
    pub entries: usize,
}

/// Packs a temporary store into a ZIP archive.
#[derive(Clone)]
pub struct ExportEngine {
    store: Arc<dyn ArtifactStore>,
}

impl ExportEngine {
    /// An engine reading frames from `store`.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Run an export on a blocking thread and await its result.
    ///
    /// Dropping the returned future cancels `cancellation`.
    ///
    /// # Errors
    ///
    /// See [`export_blocking`](Self::export_blocking).
    pub async fn export_archive(
        &self,
        handle: TempStoreHandle,
        destination: PathBuf,
        progress: ProgressReporter,
        cancellation: CancellationToken,
    ) -> Result<ArchiveResult, FramezipError> {
        let engine = self.clone();
        let guard = CancelOnDrop::new(cancellation.clone());
        let task = tokio::task::spawn_blocking(move || {
            engine.export_blocking(&handle, &destination, &progress, &cancellation)
        });
        let result = task.await.unwrap_or_else(|error| {
            Err(FramezipError::Export(format!("export task failed: {error}")))
        });
        guard.disarm();
        result
    }

    /// Write every frame in `handle` to a ZIP archive at `destination`.
    ///
    /// # Errors
    ///
    /// - [`FramezipError::Export`] if the store is empty or unreadable, or
    ///   the destination cannot be written.
    /// - [`FramezipError::Cancelled`] if `cancellation` fires.
    pub fn export_blocking(
        &self,
        handle: &TempStoreHandle,
        destination: &Path,
        progress: &ProgressReporter,
        cancellation: &CancellationToken,
    ) -> Result<ArchiveResult, FramezipError> {
        let frames = self
            .store
            .list(handle)
            .map_err(|error| FramezipError::Export(error.to_string()))?;
        if frames.is_empty() {
            return Err(FramezipError::Export("nothing to export".to_string()));
        }

        if destination.is_dir() {
            return Err(FramezipError::Export(format!(
                "{} is a directory",
                destination.display()
            )));
        }
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut staging = tempfile::Builder::new()
            .prefix(".framezip-")
            .suffix(".zip.part")
            .tempfile_in(parent)
            .map_err(|error| {
                FramezipError::Export(format!("cannot write to {}: {error}", parent.display()))
            })?;

        log::debug!(
            "Packing {} frames from {} into {}",
            frames.len(),
            handle.directory().display(),
            destination.display()
        );

        let total = frames.len() as u64;
        progress.report_items(0, Some(total));
        {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut archive = ZipWriter::new(BufWriter::new(staging.as_file_mut()));

            for (position, frame) in frames.iter().enumerate() {
                if cancellation.is_cancelled() {
                    return Err(FramezipError::Cancelled);
                }

                archive
                    .start_file(frame.file_name(), options)
                    .map_err(|error| archive_error(destination, error))?;
                let mut input = File::open(&frame.path).map_err(|error| {
                    FramezipError::Export(format!("cannot read {}: {error}", frame.path.display()))
                })?;
                io::copy(&mut input, &mut archive)
                    .map_err(|error| archive_error(destination, error))?;

                progress.report_items(position as u64 + 1, Some(total));
            }

            archive
                .finish()
                .map_err(|error| archive_error(destination, error))?
                .into_inner()
                .map_err(|error| archive_error(destination, error.into_error()))?;
        }

        if cancellation.is_cancelled() {
            return Err(FramezipError::Cancelled);
        }

        staging
            .persist(destination)
            .map_err(|error| archive_error(destination, error.error))?;

        progress.finish();
        log::info!(
            "Exported {} frames to {}",
            frames.len(),
            destination.display()
        );

        Ok(ArchiveResult {
            destination: destination.to_path_buf(),
            entries: frames.len(),
        })
    }
}

fn archive_error(destination: &Path, error: impl std::fmt::Display) -> FramezipError {
    FramezipError::Export(format!("cannot write {}: {error}", destination.display()))
}
