//! Conversion and user configuration.
//!
//! [`SamplingConfig`] describes one conversion: how many frames to sample
//! per second and what to call the resulting archive. It is editable while
//! the session is configuring and frozen once conversion starts.
//!
//! [`Preferences`] holds the persisted user settings (default export
//! directory and the auto-save toggle). A session receives them at
//! construction; nothing in the crate reads them from global state.
//!
//! # Example
//!
//! ```
//! use framezip::SamplingConfig;
//!
//! let config = SamplingConfig::new()
//!     .with_frames_per_second(2.0)
//!     .with_output_name("holiday");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.archive_file_name(), "holiday.zip");
//! ```

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::FramezipError, source::VideoSource};

/// Sampling rate used when none has been chosen.
pub const DEFAULT_FRAMES_PER_SECOND: f64 = 1.0;

const ARCHIVE_EXTENSION: &str = ".zip";

/// Settings for a single conversion.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct SamplingConfig {
    /// Frames sampled per second of video. Must be positive.
    pub frames_per_second: f64,
    /// Name of the archive to produce. Must not be blank.
    pub output_name: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingConfig {
    /// One frame per second, archive name `frames.zip`.
    pub fn new() -> Self {
        Self {
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            output_name: format!("frames{ARCHIVE_EXTENSION}"),
        }
    }

    /// Defaults for a freshly selected source: `<stem>_frames.zip`.
    pub fn for_source(source: &VideoSource) -> Self {
        Self::new().with_output_name(format!("{}_frames{ARCHIVE_EXTENSION}", source.stem()))
    }

    /// Set the sampling rate.
    pub fn with_frames_per_second(mut self, frames_per_second: f64) -> Self {
        self.frames_per_second = frames_per_second;
        self
    }

    /// Set the archive name.
    pub fn with_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.output_name = output_name.into();
        self
    }

    /// Check the configuration before a conversion starts.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::InvalidConfig`] for a non-finite or
    /// non-positive rate, or a blank output name.
    pub fn validate(&self) -> Result<(), FramezipError> {
        if !self.frames_per_second.is_finite() || self.frames_per_second <= 0.0 {
            return Err(FramezipError::InvalidConfig(format!(
                "frames per second must be a positive number, got {}",
                self.frames_per_second
            )));
        }
        if self.output_name.trim().is_empty() {
            return Err(FramezipError::InvalidConfig(
                "output name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The archive file name, with `.zip` appended when missing.
    pub fn archive_file_name(&self) -> String {
        let name = self.output_name.trim();
        if name.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) {
            name.to_string()
        } else {
            format!("{name}{ARCHIVE_EXTENSION}")
        }
    }
}

/// Persisted user preferences.
///
/// Serialized as JSON with the keys `default_download_path` and
/// `auto_save_enabled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Directory archives are saved to when auto-save is on.
    #[serde(rename = "default_download_path", skip_serializing_if = "Option::is_none")]
    pub default_export_dir: Option<PathBuf>,
    /// Export straight to [`default_export_dir`](Self::default_export_dir)
    /// instead of asking for a destination.
    #[serde(rename = "auto_save_enabled")]
    pub auto_save: bool,
}

impl Preferences {
    /// Set the default export directory.
    #[must_use]
    pub fn with_default_export_dir<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.default_export_dir = Some(directory.as_ref().to_path_buf());
        self
    }

    /// Turn auto-save on or off.
    #[must_use]
    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Where an archive named `archive_name` should go without asking.
    ///
    /// `None` unless auto-save is enabled and a directory is set.
    pub fn export_destination(&self, archive_name: &str) -> Option<PathBuf> {
        if !self.auto_save {
            return None;
        }
        self.default_export_dir
            .as_ref()
            .map(|directory| directory.join(archive_name))
    }

    /// Load preferences from a JSON file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Io`] if the file exists but cannot be read,
    /// or [`FramezipError::InvalidConfig`] if it is not valid JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FramezipError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                log::debug!("No preferences at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(error) => return Err(error.into()),
        };
        serde_json::from_str(&content).map_err(|error| {
            FramezipError::InvalidConfig(format!(
                "cannot parse preferences {}: {error}",
                path.display()
            ))
        })
    }

    /// Write preferences to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::Io`] if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FramezipError> {
        let content = serde_json::to_string_pretty(self).map_err(|error| {
            FramezipError::InvalidConfig(format!("cannot serialize preferences: {error}"))
        })?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
