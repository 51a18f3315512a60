use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framezip::{
    ConversionStep, DiskStore, FfmpegBackend, FfmpegLogLevel, FrameCount, MediaBackend,
    OperationType, Preferences, ProgressCallback, ProgressInfo, Session, SessionHandle,
    VideoSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framezip info input.mp4 --json\n  framezip convert input.mp4 --fps 2 --out-dir archives --progress\n  framezip preferences set-dir ~/Downloads\n  framezip completions zsh > _framezip";

#[derive(Debug, Parser)]
#[command(
    name = "framezip",
    version,
    about = "Sample still frames from a video and package them into a ZIP archive",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output (RUST_LOG overrides).
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar while converting and exporting.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<FfmpegLogLevel>,

    /// Preferences file (default: ~/.config/framezip/preferences.json).
    #[arg(long, global = true)]
    preferences: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print duration, frame rate and dimensions of a video.
    #[command(
        visible_alias = "probe",
        after_help = "Examples:\n  framezip info input.mp4\n  framezip info input.mp4 --fps 2 --json"
    )]
    Info {
        /// Input video (mp4, mov, avi or mkv).
        input: PathBuf,

        /// Sampling rate used for the expected frame count.
        #[arg(long, default_value_t = framezip::DEFAULT_FRAMES_PER_SECOND, value_parser = parse_frames_per_second)]
        fps: f64,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract frames and write them to a ZIP archive.
    #[command(
        after_help = "Examples:\n  framezip convert input.mp4 --fps 2\n  framezip convert input.mp4 --name holiday --out-dir archives --overwrite"
    )]
    Convert {
        /// Input video (mp4, mov, avi or mkv).
        input: PathBuf,

        /// Frames to sample per second of video.
        #[arg(long, default_value_t = framezip::DEFAULT_FRAMES_PER_SECOND, value_parser = parse_frames_per_second)]
        fps: f64,

        /// Archive name (default: <input stem>_frames.zip).
        #[arg(long)]
        name: Option<String>,

        /// Directory to write the archive to (default: the preferred
        /// directory when auto-save is on, else the current directory).
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Replace an existing archive.
        #[arg(long)]
        overwrite: bool,

        /// Print every extracted frame before exporting.
        #[arg(long)]
        list_frames: bool,
    },

    /// Show or change saved preferences.
    Preferences {
        #[command(subcommand)]
        action: Option<PreferencesAction>,
    },

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum PreferencesAction {
    /// Print the current preferences.
    Show,
    /// Set the default export directory.
    SetDir { directory: PathBuf },
    /// Turn auto-save on or off.
    AutoSave {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    /// Reset to defaults.
    Clear,
}

fn parse_frames_per_second(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate: {value}"))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(format!("frame rate must be positive, got {value}"));
    }
    Ok(parsed)
}

fn default_preferences_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".config")
            .join("framezip")
            .join("preferences.json"),
        None => PathBuf::from("framezip-preferences.json"),
    }
}

/// `--out-dir` wins, then the auto-save destination, then the current directory.
fn resolve_destination(
    out_dir: Option<&Path>,
    preferred: Option<PathBuf>,
    archive_name: &str,
) -> PathBuf {
    match (out_dir, preferred) {
        (Some(directory), _) => directory.join(archive_name),
        (None, Some(preferred)) => preferred,
        (None, None) => PathBuf::from(archive_name),
    }
}

fn operation_label(operation: OperationType) -> &'static str {
    match operation {
        OperationType::Conversion => "converting",
        OperationType::Export => "exporting",
        _ => "working",
    }
}

#[derive(Default)]
struct TerminalProgress {
    bar: Mutex<Option<(OperationType, ProgressBar)>>,
}

impl TerminalProgress {
    fn new_bar(operation: OperationType) -> ProgressBar {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{prefix:>10.cyan.bold} {bar:40.cyan/blue} {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("##-"));
        bar.set_prefix(operation_label(operation));
        bar
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        let mut slot = self
            .bar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if slot
            .as_ref()
            .is_none_or(|(operation, _)| *operation != info.operation)
        {
            if let Some((_, previous)) = slot.take() {
                previous.finish_and_clear();
            }
            *slot = Some((info.operation, Self::new_bar(info.operation)));
        }

        if let Some((_, bar)) = slot.as_ref() {
            bar.set_position(u64::from(info.percentage));
            if let Some(total) = info.total {
                bar.set_message(format!("{}/{total} frames", info.current));
            }
            if info.percentage == 100 {
                bar.finish();
            }
        }
    }
}

/// What a Ctrl-C does at the session's current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// The operation in flight was cancelled.
    Cancelled,
    /// Frames exist on disk; the next checkpoint cleans them up.
    Deferred,
    /// Nothing to clean up, or a second Ctrl-C.
    Exit,
}

fn interrupt(handle: &SessionHandle, interrupted: &AtomicBool) -> Interrupt {
    if handle.cancel() {
        return Interrupt::Cancelled;
    }
    let holds_store = matches!(
        handle.step(),
        ConversionStep::Converting | ConversionStep::Preview
    );
    if holds_store && !interrupted.swap(true, Ordering::SeqCst) {
        Interrupt::Deferred
    } else {
        Interrupt::Exit
    }
}

/// Release the preview and fail if Ctrl-C was pressed since conversion.
async fn abort_if_interrupted(
    session: &mut Session,
    interrupted: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !interrupted.load(Ordering::SeqCst) {
        return Ok(());
    }
    session.cancel_preview().await?;
    Err("interrupted".into())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn print_frame_count(count: Option<FrameCount>) {
    match count {
        Some(FrameCount::Estimated(frames)) => {
            println!("{} ~{frames} (estimated)", "Frames:".bold());
        }
        Some(FrameCount::Actual(frames)) => println!("{} {frames}", "Frames:".bold()),
        None => println!("{} unknown", "Frames:".bold()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn convert(
    session: &mut Session,
    input: &Path,
    fps: f64,
    name: Option<String>,
    out_dir: Option<&Path>,
    overwrite: bool,
    list_frames: bool,
    interrupted: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    session.select_source(VideoSource::from_path(input)).await?;
    session.set_frames_per_second(fps)?;
    if let Some(name) = name {
        session.set_output_name(name)?;
    }

    let archive_name = session
        .config()
        .map(|config| config.archive_file_name())
        .unwrap_or_default();
    let destination = resolve_destination(out_dir, session.default_destination(), &archive_name);
    if destination.exists() && !overwrite {
        return Err(format!(
            "output file already exists: {} (use --overwrite)",
            destination.display()
        )
        .into());
    }
    print_frame_count(session.frame_count());

    let produced = session.start_conversion().await?;
    println!("{} {produced} frames", "Extracted".green().bold());

    if list_frames {
        for frame in session.frames() {
            println!("  {}", frame.path.display());
        }
    }
    abort_if_interrupted(session, interrupted).await?;

    match session.export(destination).await {
        Ok(archive) => {
            println!(
                "{} {} ({} frames)",
                "Wrote".green().bold(),
                archive.destination.display(),
                archive.entries
            );
            session.finish()?;
            Ok(())
        }
        Err(error) => {
            session.cancel_preview().await?;
            Err(error.into())
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    if let Some(level) = cli.global.log_level {
        framezip::set_ffmpeg_log_level(level);
    }
    let preferences_path = cli
        .global
        .preferences
        .clone()
        .unwrap_or_else(default_preferences_path);

    match cli.command {
        Commands::Info { input, fps, json } => {
            let source = VideoSource::from_path(&input);
            source.validate()?;
            let metadata = FfmpegBackend::new().video_info(&input)?;
            let expected = metadata.expected_frame_count(fps);

            if json {
                let payload = json!({
                    "name": source.display_name(),
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "fps": metadata.frames_per_second,
                    "width": metadata.dimensions.map(|(width, _)| width),
                    "height": metadata.dimensions.map(|(_, height)| height),
                    "native_frame_count": metadata.native_frame_count(),
                    "sampling_fps": fps,
                    "expected_frames": expected,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{} {}", "Video:".bold(), source.display_name());
                println!("{} {:.3}s", "Duration:".bold(), metadata.duration.as_secs_f64());
                if let Some(rate) = metadata.frames_per_second {
                    println!("{} {rate:.3} fps", "Frame rate:".bold());
                }
                if let Some((width, height)) = metadata.dimensions {
                    println!("{} {width}x{height}", "Dimensions:".bold());
                }
                println!("{} ~{expected} at {fps} fps", "Expected frames:".bold());
            }
        }
        Commands::Convert {
            input,
            fps,
            name,
            out_dir,
            overwrite,
            list_frames,
        } => {
            let preferences = Preferences::load(&preferences_path)?;
            let mut session = Session::new(
                Arc::new(FfmpegBackend::new()),
                Arc::new(DiskStore::in_temp_dir()),
            )
            .with_preferences(preferences);
            if cli.global.progress {
                session = session.with_progress(Arc::new(TerminalProgress::default()));
            }

            let handle = session.handle();
            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&interrupted);
            ctrlc::set_handler(move || match interrupt(&handle, &flag) {
                Interrupt::Cancelled | Interrupt::Deferred => {
                    eprintln!("\n{}", "Cancelling...".yellow());
                }
                Interrupt::Exit => std::process::exit(130),
            })?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(convert(
                &mut session,
                &input,
                fps,
                name,
                out_dir.as_deref(),
                overwrite,
                list_frames,
                &interrupted,
            ))?;
        }
        Commands::Preferences { action } => {
            let mut preferences = Preferences::load(&preferences_path)?;
            let changed = match action.unwrap_or(PreferencesAction::Show) {
                PreferencesAction::Show => false,
                PreferencesAction::SetDir { directory } => {
                    preferences = preferences.with_default_export_dir(directory);
                    true
                }
                PreferencesAction::AutoSave { enabled } => {
                    preferences = preferences.with_auto_save(enabled);
                    true
                }
                PreferencesAction::Clear => {
                    preferences = Preferences::default();
                    true
                }
            };

            if changed {
                if let Some(parent) = preferences_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                preferences.save(&preferences_path)?;
                log::debug!("Saved preferences to {}", preferences_path.display());
            }
            println!("{}", serde_json::to_string_pretty(&preferences)?);
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framezip", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
