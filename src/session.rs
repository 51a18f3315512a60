//! The session state machine.
//!
//! A [`Session`] drives one video at a time through
//! `Select → Configure → Converting → Preview → Select`, with `Done` as the
//! post-export view that also returns to `Select`. Each step is a variant of
//! [`SessionState`] carrying only the data valid in that step, so a session
//! in `Configure` has no store and a session in `Preview` always has one.
//!
//! The session owns the live temporary store and releases it on every path
//! that leaves it behind: a successful export, cancelling the preview,
//! selecting another source, or dropping the session. At most one engine
//! invocation is in flight at a time. If the future driving one is dropped,
//! the background work is cancelled and the next session call settles it
//! before doing anything else.
//!
//! # Example
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
//!
//! let frames = session.start_conversion().await?;
//! println!("extracted {frames} frames");
//!
//! let archive = session.export("input_frames.zip").await?;
//! println!("wrote {}", archive.destination.display());
//! session.finish()?;
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    mem,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    backend::MediaBackend,
    configuration::{Preferences, SamplingConfig},
    conversion::{CancelOnDrop, Conversion, ConversionEngine},
    error::FramezipError,
    export::{ArchiveResult, ExportEngine},
    metadata::{FrameCount, VideoMetadata},
    progress::{
        CancellationToken, NoOpProgress, OperationType, ProgressCallback, ProgressSubscription,
    },
    source::VideoSource,
    store::{ArtifactStore, FrameArtifact, TempStoreHandle},
};

/// The step a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionStep {
    /// Waiting for a video.
    Select,
    /// A video is selected and its sampling settings can be edited.
    Configure,
    /// Frames are being extracted.
    Converting,
    /// Frames are available for preview and export.
    Preview,
    /// The archive has been written.
    Done,
}

impl Display for ConversionStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ConversionStep::Select => "select",
            ConversionStep::Configure => "configure",
            ConversionStep::Converting => "converting",
            ConversionStep::Preview => "preview",
            ConversionStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Data held while configuring a conversion.
#[derive(Debug, Clone)]
pub struct Configuring {
    /// The selected video.
    pub source: VideoSource,
    /// Editable sampling settings.
    pub config: SamplingConfig,
    /// Probed metadata; `None` if probing failed.
    pub metadata: Option<VideoMetadata>,
    /// Message of the last failed conversion attempt.
    pub last_error: Option<String>,
}

/// Data held while previewing extracted frames.
#[derive(Debug, Clone)]
pub struct Previewing {
    /// The converted video.
    pub source: VideoSource,
    /// The settings the frames were sampled with.
    pub config: SamplingConfig,
    /// The live store holding the frames.
    pub store: TempStoreHandle,
    /// Frames in index order.
    pub frames: Vec<FrameArtifact>,
    /// The count metadata predicted before conversion.
    pub expected_frames: u64,
    /// Message of the last failed export attempt.
    pub last_error: Option<String>,
}

/// Data held after a successful export.
#[derive(Debug, Clone)]
pub struct Finished {
    /// Where the archive was written.
    pub archive: ArchiveResult,
    /// Frames in the archive.
    pub frame_count: u64,
}

/// A session's state, one variant per [`ConversionStep`].
#[derive(Debug, Clone)]
pub enum SessionState {
    /// No video selected.
    Select,
    /// See [`Configuring`].
    Configure(Configuring),
    /// Conversion in flight with frozen settings.
    Converting {
        /// The video being converted.
        source: VideoSource,
        /// The frozen settings.
        config: SamplingConfig,
        /// Probed metadata carried over from configuring.
        metadata: Option<VideoMetadata>,
    },
    /// See [`Previewing`].
    Preview(Previewing),
    /// See [`Finished`].
    Done(Finished),
}

impl SessionState {
    /// The step this state belongs to.
    pub fn step(&self) -> ConversionStep {
        match self {
            SessionState::Select => ConversionStep::Select,
            SessionState::Configure(_) => ConversionStep::Configure,
            SessionState::Converting { .. } => ConversionStep::Converting,
            SessionState::Preview(_) => ConversionStep::Preview,
            SessionState::Done(_) => ConversionStep::Done,
        }
    }
}

enum InFlightTask {
    Conversion(JoinHandle<Result<Conversion, FramezipError>>),
    Export(JoinHandle<Result<ArchiveResult, FramezipError>>),
}

struct InFlight {
    cancellation: CancellationToken,
    task: InFlightTask,
}

enum Outcome {
    Conversion(Result<Conversion, FramezipError>),
    Export(Result<ArchiveResult, FramezipError>),
}

type ActiveToken = Arc<Mutex<Option<CancellationToken>>>;

fn lock(active: &Mutex<Option<CancellationToken>>) -> MutexGuard<'_, Option<CancellationToken>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn release_quietly(store: &dyn ArtifactStore, handle: &TempStoreHandle) {
    if let Err(error) = store.release(handle) {
        log::warn!("{error}");
    }
}

/// A cloneable view of a session for other tasks.
///
/// The session itself is borrowed mutably while an operation is awaited;
/// a handle can still observe the current step and cancel the operation.
#[derive(Clone)]
pub struct SessionHandle {
    step: watch::Receiver<ConversionStep>,
    active: ActiveToken,
}

impl SessionHandle {
    /// Cancel the operation in flight. Returns `false` if there was none.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// The session's current step.
    pub fn step(&self) -> ConversionStep {
        *self.step.borrow()
    }

    /// Wait for the next step change. `None` once the session is dropped.
    pub async fn changed(&mut self) -> Option<ConversionStep> {
        self.step.changed().await.ok()?;
        Some(*self.step.borrow_and_update())
    }
}

/// Orchestrates conversion, preview, export and cleanup for one user.
pub struct Session {
    backend: Arc<dyn MediaBackend>,
    store: Arc<dyn ArtifactStore>,
    conversion: ConversionEngine,
    export: ExportEngine,
    preferences: Preferences,
    progress: Arc<dyn ProgressCallback>,
    state: SessionState,
    step: watch::Sender<ConversionStep>,
    active: ActiveToken,
    in_flight: Option<InFlight>,
}

impl Session {
    /// A session in `Select` that samples with `backend` into `store`.
    pub fn new(backend: Arc<dyn MediaBackend>, store: Arc<dyn ArtifactStore>) -> Self {
        let (step, _) = watch::channel(ConversionStep::Select);
        Self {
            conversion: ConversionEngine::new(Arc::clone(&backend), Arc::clone(&store)),
            export: ExportEngine::new(Arc::clone(&store)),
            backend,
            store,
            preferences: Preferences::default(),
            progress: Arc::new(NoOpProgress),
            state: SessionState::Select,
            step,
            active: Arc::new(Mutex::new(None)),
            in_flight: None,
        }
    }

    /// Receive progress for every conversion and export.
    ///
    /// Each invocation subscribes `callback` on its own channel and
    /// unsubscribes before the session changes state.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Use `preferences` for default export destinations.
    #[must_use]
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// A handle for observing and cancelling from another task.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            step: self.step.subscribe(),
            active: Arc::clone(&self.active),
        }
    }

    /// The current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The current step.
    pub fn step(&self) -> ConversionStep {
        self.state.step()
    }

    /// The injected preferences.
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Whether a conversion or export is in flight or awaiting settlement.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The selected video, in every step that has one.
    pub fn source(&self) -> Option<&VideoSource> {
        match &self.state {
            SessionState::Configure(configuring) => Some(&configuring.source),
            SessionState::Converting { source, .. } => Some(source),
            SessionState::Preview(previewing) => Some(&previewing.source),
            SessionState::Select | SessionState::Done(_) => None,
        }
    }

    /// The sampling settings, in every step that has them.
    pub fn config(&self) -> Option<&SamplingConfig> {
        match &self.state {
            SessionState::Configure(configuring) => Some(&configuring.config),
            SessionState::Converting { config, .. } => Some(config),
            SessionState::Preview(previewing) => Some(&previewing.config),
            SessionState::Select | SessionState::Done(_) => None,
        }
    }

    /// Probed metadata of the selected video, if available.
    pub fn metadata(&self) -> Option<&VideoMetadata> {
        match &self.state {
            SessionState::Configure(configuring) => configuring.metadata.as_ref(),
            SessionState::Converting { metadata, .. } => metadata.as_ref(),
            _ => None,
        }
    }

    /// Frames available for preview. Empty outside `Preview`.
    ///
    /// The paths become invalid once the session leaves `Preview`.
    pub fn frames(&self) -> &[FrameArtifact] {
        match &self.state {
            SessionState::Preview(previewing) => &previewing.frames,
            _ => &[],
        }
    }

    /// The frame count to display.
    ///
    /// Before conversion this is an estimate from metadata; once frames
    /// exist it is the number actually produced.
    pub fn frame_count(&self) -> Option<FrameCount> {
        match &self.state {
            SessionState::Configure(Configuring {
                config, metadata, ..
            })
            | SessionState::Converting {
                config, metadata, ..
            } => metadata.as_ref().map(|metadata| {
                FrameCount::Estimated(metadata.expected_frame_count(config.frames_per_second))
            }),
            SessionState::Preview(previewing) => {
                Some(FrameCount::Actual(previewing.frames.len() as u64))
            }
            SessionState::Done(finished) => Some(FrameCount::Actual(finished.frame_count)),
            SessionState::Select => None,
        }
    }

    /// The message of the last failed conversion (in `Configure`) or export
    /// (in `Preview`).
    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            SessionState::Configure(configuring) => configuring.last_error.as_deref(),
            SessionState::Preview(previewing) => previewing.last_error.as_deref(),
            _ => None,
        }
    }

    /// The written archive, in `Done`.
    pub fn archive(&self) -> Option<&ArchiveResult> {
        match &self.state {
            SessionState::Done(finished) => Some(&finished.archive),
            _ => None,
        }
    }

    /// Where [`export_default`](Self::export_default) would write.
    pub fn default_destination(&self) -> Option<PathBuf> {
        self.config()
            .and_then(|config| self.preferences.export_destination(&config.archive_file_name()))
    }

    /// Select a video and move to `Configure`.
    ///
    /// Allowed in every step once any outstanding operation has settled.
    /// Metadata is probed for the frame estimate; a failed probe is logged
    /// and leaves the estimate unknown. A store left from a previous
    /// conversion is released only once the probe has finished, so dropping
    /// this future leaves the session where it was.
    ///
    /// # Errors
    ///
    /// Returns [`FramezipError::UnsupportedSource`] or
    /// [`FramezipError::Metadata`] if the source is rejected; the session
    /// then stays where it was.
    pub async fn select_source(&mut self, source: VideoSource) -> Result<(), FramezipError> {
        self.settle_outstanding().await;
        source.validate()?;

        let backend = Arc::clone(&self.backend);
        let probe_source = source.clone();
        let probed = tokio::task::spawn_blocking(move || {
            let input = probe_source.materialize()?;
            backend.video_info(input.path())
        })
        .await;
        let metadata = match probed {
            Ok(Ok(metadata)) => Some(metadata),
            Ok(Err(error)) => {
                log::warn!("{error}");
                None
            }
            Err(error) => {
                log::warn!("Metadata probe for {} failed: {error}", source.display_name());
                None
            }
        };

        // No await from here on: the old store and the state change together.
        if let SessionState::Preview(previewing) = &self.state {
            release_quietly(self.store.as_ref(), &previewing.store);
        }

        let config = SamplingConfig::for_source(&source);
        self.set_state(SessionState::Configure(Configuring {
            source,
            config,
            metadata,
            last_error: None,
        }));
        Ok(())
    }

    /// Change the sampling rate while configuring.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Configure`, or
    /// [`FramezipError::InvalidConfig`] for a non-positive rate.
    pub fn set_frames_per_second(&mut self, frames_per_second: f64) -> Result<(), FramezipError> {
        self.edit_config("change the frame rate", |config| {
            config.with_frames_per_second(frames_per_second)
        })
    }

    /// Change the archive name while configuring.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Configure`, or
    /// [`FramezipError::InvalidConfig`] for a blank name.
    pub fn set_output_name(&mut self, output_name: impl Into<String>) -> Result<(), FramezipError> {
        let output_name = output_name.into();
        self.edit_config("change the output name", |config| {
            config.with_output_name(output_name)
        })
    }

    fn edit_config(
        &mut self,
        action: &'static str,
        edit: impl FnOnce(SamplingConfig) -> SamplingConfig,
    ) -> Result<(), FramezipError> {
        let SessionState::Configure(configuring) = &mut self.state else {
            return Err(self.invalid(action));
        };
        let edited = edit(configuring.config.clone());
        edited.validate()?;
        configuring.config = edited;
        Ok(())
    }

    /// Drop the selected video and return to `Select`.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Configure`.
    pub fn discard(&mut self) -> Result<(), FramezipError> {
        if !matches!(self.state, SessionState::Configure(_)) {
            return Err(self.invalid("discard the selection"));
        }
        self.set_state(SessionState::Select);
        Ok(())
    }

    /// Freeze the settings and convert, returning the number of frames.
    ///
    /// On success the session is in `Preview` and the actual frame count
    /// replaces the estimate. On failure or cancellation it is back in
    /// `Configure` with the error recorded, and no store is left behind.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Configure`; otherwise
    /// whatever the conversion engine reports.
    pub async fn start_conversion(&mut self) -> Result<u64, FramezipError> {
        self.settle_outstanding().await;

        let configuring = match mem::replace(&mut self.state, SessionState::Select) {
            SessionState::Configure(configuring) => configuring,
            other => {
                self.state = other;
                return Err(self.invalid("start a conversion"));
            }
        };

        let Configuring {
            source,
            config,
            metadata,
            ..
        } = configuring;
        self.set_state(SessionState::Converting {
            source: source.clone(),
            config: config.clone(),
            metadata,
        });

        let subscription =
            ProgressSubscription::new(Arc::clone(&self.progress), OperationType::Conversion);
        let reporter = subscription.reporter();
        let engine = self.conversion.clone();
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.convert_blocking(&source, &config, &reporter, &token)
        });
        self.launch(cancellation.clone(), InFlightTask::Conversion(task));

        let guard = CancelOnDrop::new(cancellation);
        let result = match self.join_in_flight().await {
            Some(Outcome::Conversion(result)) => result,
            _ => Err(FramezipError::Conversion(
                "conversion was not in flight".to_string(),
            )),
        };
        guard.disarm();
        subscription.unsubscribe();

        self.finish_conversion(result)
    }

    /// Pack the previewed frames into an archive at `destination`.
    ///
    /// On success the session moves to `Done` and the store is released.
    /// On failure it stays in `Preview` with the store intact, so the
    /// export can be retried without converting again.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Preview`; otherwise
    /// whatever the export engine reports.
    pub async fn export(
        &mut self,
        destination: impl Into<PathBuf>,
    ) -> Result<ArchiveResult, FramezipError> {
        self.settle_outstanding().await;

        let SessionState::Preview(previewing) = &self.state else {
            return Err(self.invalid("export"));
        };
        let handle = previewing.store.clone();
        let destination = destination.into();

        let subscription =
            ProgressSubscription::new(Arc::clone(&self.progress), OperationType::Export);
        let reporter = subscription.reporter();
        let engine = self.export.clone();
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.export_blocking(&handle, &destination, &reporter, &token)
        });
        self.launch(cancellation.clone(), InFlightTask::Export(task));

        let guard = CancelOnDrop::new(cancellation);
        let result = match self.join_in_flight().await {
            Some(Outcome::Export(result)) => result,
            _ => Err(FramezipError::Export("export was not in flight".to_string())),
        };
        guard.disarm();
        subscription.unsubscribe();

        self.finish_export(result)
    }

    /// Export to [`default_destination`](Self::default_destination).
    ///
    /// # Errors
    ///
    /// [`FramezipError::Export`] if auto-save is off or no default
    /// directory is set; otherwise as [`export`](Self::export).
    pub async fn export_default(&mut self) -> Result<ArchiveResult, FramezipError> {
        let destination = self.default_destination().ok_or_else(|| {
            FramezipError::Export(
                "no default export directory is configured; choose a destination".to_string(),
            )
        })?;
        self.export(destination).await
    }

    /// Abandon the preview: release the store and return to `Select`.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Preview`.
    pub async fn cancel_preview(&mut self) -> Result<(), FramezipError> {
        self.settle_outstanding().await;

        let SessionState::Preview(previewing) = &self.state else {
            return Err(self.invalid("cancel the preview"));
        };
        release_quietly(self.store.as_ref(), &previewing.store);
        self.set_state(SessionState::Select);
        Ok(())
    }

    /// Leave the `Done` view and return to `Select`.
    ///
    /// # Errors
    ///
    /// [`FramezipError::InvalidTransition`] outside `Done`.
    pub fn finish(&mut self) -> Result<(), FramezipError> {
        if !matches!(self.state, SessionState::Done(_)) {
            return Err(self.invalid("finish"));
        }
        self.set_state(SessionState::Select);
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> FramezipError {
        FramezipError::InvalidTransition {
            action,
            step: self.state.step(),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        let step = state.step();
        let previous = *self.step.borrow();
        if step != previous {
            log::debug!("Session {previous} -> {step}");
        }
        self.state = state;
        self.step.send_replace(step);
    }

    fn launch(&mut self, cancellation: CancellationToken, task: InFlightTask) {
        *lock(&self.active) = Some(cancellation.clone());
        self.in_flight = Some(InFlight { cancellation, task });
    }

    /// Await the operation in flight. It stays recorded until it completes,
    /// so a dropped caller leaves it for [`settle_outstanding`].
    async fn join_in_flight(&mut self) -> Option<Outcome> {
        let in_flight = self.in_flight.as_mut()?;
        let outcome = match &mut in_flight.task {
            InFlightTask::Conversion(task) => Outcome::Conversion(task.await.unwrap_or_else(
                |error| {
                    Err(FramezipError::Conversion(format!(
                        "conversion task failed: {error}"
                    )))
                },
            )),
            InFlightTask::Export(task) => Outcome::Export(task.await.unwrap_or_else(|error| {
                Err(FramezipError::Export(format!("export task failed: {error}")))
            })),
        };
        self.in_flight = None;
        *lock(&self.active) = None;
        Some(outcome)
    }

    /// Cancel and reap an operation whose caller went away.
    async fn settle_outstanding(&mut self) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        log::warn!("Settling an abandoned operation in the {} step", self.step());
        in_flight.cancellation.cancel();

        match self.join_in_flight().await {
            Some(Outcome::Conversion(result)) => {
                if let Ok(conversion) = &result {
                    release_quietly(self.store.as_ref(), &conversion.store);
                }
                let _ = self.finish_conversion(result.and(Err(FramezipError::Cancelled)));
            }
            Some(Outcome::Export(result)) => {
                let _ = self.finish_export(result);
            }
            None => {}
        }
    }

    fn finish_conversion(
        &mut self,
        result: Result<Conversion, FramezipError>,
    ) -> Result<u64, FramezipError> {
        let (source, config, metadata) = match mem::replace(&mut self.state, SessionState::Select)
        {
            SessionState::Converting {
                source,
                config,
                metadata,
            } => (source, config, metadata),
            other => {
                self.state = other;
                if let Ok(conversion) = &result {
                    release_quietly(self.store.as_ref(), &conversion.store);
                }
                return Err(self.invalid("complete a conversion"));
            }
        };

        match result {
            Ok(conversion) => {
                let frame_count = conversion.frames.len() as u64;
                if frame_count != conversion.expected_frames {
                    log::debug!(
                        "Expected {} frames, produced {frame_count}",
                        conversion.expected_frames
                    );
                }
                self.set_state(SessionState::Preview(Previewing {
                    source,
                    config,
                    store: conversion.store,
                    frames: conversion.frames,
                    expected_frames: conversion.expected_frames,
                    last_error: None,
                }));
                Ok(frame_count)
            }
            Err(error) => {
                self.set_state(SessionState::Configure(Configuring {
                    source,
                    config,
                    metadata,
                    last_error: Some(error.to_string()),
                }));
                Err(error)
            }
        }
    }

    fn finish_export(
        &mut self,
        result: Result<ArchiveResult, FramezipError>,
    ) -> Result<ArchiveResult, FramezipError> {
        let previewing = match mem::replace(&mut self.state, SessionState::Select) {
            SessionState::Preview(previewing) => previewing,
            other => {
                self.state = other;
                return result;
            }
        };

        match result {
            Ok(archive) => {
                let frame_count = previewing.frames.len() as u64;
                self.set_state(SessionState::Done(Finished {
                    archive: archive.clone(),
                    frame_count,
                }));
                release_quietly(self.store.as_ref(), &previewing.store);
                Ok(archive)
            }
            Err(error) => {
                self.state = SessionState::Preview(Previewing {
                    last_error: Some(error.to_string()),
                    ..previewing
                });
                Err(error)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancellation.cancel();
            // A cancelled conversion releases its own store; one that
            // completed before noticing still needs releasing.
            if let InFlightTask::Conversion(task) = in_flight.task {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let store = Arc::clone(&self.store);
                        runtime.spawn(async move {
                            if let Ok(Ok(conversion)) = task.await {
                                release_quietly(store.as_ref(), &conversion.store);
                            }
                        });
                    }
                    Err(_) => log::warn!("Session dropped outside a runtime mid-conversion"),
                }
            }
        }

        if let SessionState::Preview(previewing) = &self.state {
            release_quietly(self.store.as_ref(), &previewing.store);
        }
    }
}
