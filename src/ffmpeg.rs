//! FFmpeg media backend.
//!
//! [`FfmpegBackend`] implements [`MediaBackend`] with `ffmpeg-next`: it
//! probes duration, frame rate and dimensions from the container and best
//! video stream, and samples frames by decoding the stream once from the
//! start, keeping the first decoded frame at or after each sample time.
//!
//! FFmpeg has its own logging, separate from the [`log`] facade this crate
//! uses. [`set_ffmpeg_log_level`] tunes it without importing `ffmpeg-next`.

use std::{fmt, path::Path, str::FromStr, time::Duration};

use ffmpeg_next::{
    Rational,
    codec::{context::Context as CodecContext, decoder::Video as VideoDecoder},
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::{DynamicImage, RgbImage};

use crate::{
    backend::{FrameSink, MediaBackend, SampleRequest},
    error::FramezipError,
    metadata::VideoMetadata,
};

/// FFmpeg internal log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging messages.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(format!("unknown FFmpeg log level: {other}")),
        }
    }
}

impl fmt::Display for FfmpegLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FfmpegLogLevel::Quiet => "quiet",
            FfmpegLogLevel::Fatal => "fatal",
            FfmpegLogLevel::Error => "error",
            FfmpegLogLevel::Warning => "warning",
            FfmpegLogLevel::Info => "info",
            FfmpegLogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Set FFmpeg's global log level. Affects every FFmpeg call in the process.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// A [`MediaBackend`] backed by the FFmpeg libraries.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// use framezip::{FfmpegBackend, MediaBackend};
///
/// let metadata = FfmpegBackend::new().video_info(Path::new("input.mp4"))?;
/// println!("{:?} at {:?} fps", metadata.duration, metadata.frames_per_second);
/// # Ok::<(), framezip::FramezipError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    /// Create a backend. FFmpeg is initialised lazily on first use.
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_input(input: &Path) -> Result<Input, String> {
    ffmpeg_next::init().map_err(|error| format!("FFmpeg initialisation failed: {error}"))?;
    ffmpeg_next::format::input(&input).map_err(|error| error.to_string())
}

fn metadata_error(input: &Path, reason: impl Into<String>) -> FramezipError {
    FramezipError::Metadata {
        name: input.display().to_string(),
        reason: reason.into(),
    }
}

fn rational_to_f64(rational: Rational) -> Option<f64> {
    (rational.denominator() != 0 && rational.numerator() > 0)
        .then(|| rational.numerator() as f64 / rational.denominator() as f64)
}

fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

impl MediaBackend for FfmpegBackend {
    fn video_info(&self, input: &Path) -> Result<VideoMetadata, FramezipError> {
        log::debug!("Probing {}", input.display());
        let context = open_input(input).map_err(|reason| metadata_error(input, reason))?;

        let stream = context
            .streams()
            .best(Type::Video)
            .ok_or_else(|| metadata_error(input, "no video stream found"))?;

        let container_micros = context.duration();
        let duration = if container_micros > 0 {
            Duration::from_micros(container_micros as u64)
        } else if stream.duration() > 0 {
            Duration::from_secs_f64(pts_to_seconds(stream.duration(), stream.time_base()))
        } else {
            Duration::ZERO
        };

        let mut metadata = VideoMetadata::new(duration);
        if let Some(frames_per_second) =
            rational_to_f64(stream.avg_frame_rate()).or_else(|| rational_to_f64(stream.rate()))
        {
            metadata = metadata.with_frame_rate(frames_per_second);
        }

        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| metadata_error(input, format!("cannot open decoder: {error}")))?;
        Ok(metadata.with_dimensions(decoder.width(), decoder.height()))
    }

    fn sample_frames(
        &self,
        input: &Path,
        request: &SampleRequest<'_>,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), FramezipError> {
        let mut context = open_input(input).map_err(FramezipError::Conversion)?;

        let (stream_index, time_base, native_rate, mut decoder) = {
            let stream = context.streams().best(Type::Video).ok_or_else(|| {
                FramezipError::Conversion(format!("no video stream in {}", input.display()))
            })?;
            let decoder = CodecContext::from_parameters(stream.parameters())?
                .decoder()
                .video()?;
            (
                stream.index(),
                stream.time_base(),
                rational_to_f64(stream.avg_frame_rate()),
                decoder,
            )
        };

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        let mut sampler = FrameSampler {
            scaler,
            decoded: VideoFrame::empty(),
            rgb: VideoFrame::empty(),
            time_base,
            width,
            height,
            // Accept a frame that lands within half a native frame of the sample time.
            tolerance: native_rate.map_or(0.001, |rate| 0.5 / rate),
            origin: None,
            next: 0,
        };

        for (stream, packet) in context.packets() {
            request.check_cancelled()?;
            if sampler.is_done(request) {
                break;
            }
            if stream.index() != stream_index {
                continue;
            }

            decoder.send_packet(&packet)?;
            sampler.drain(&mut decoder, request, sink)?;
        }

        if !sampler.is_done(request) {
            decoder.send_eof()?;
            sampler.drain(&mut decoder, request, sink)?;
        }

        log::debug!(
            "Sampled {} of {} frames from {}",
            sampler.next,
            request.frame_limit,
            input.display()
        );
        Ok(())
    }
}

/// Picks sample frames out of the decoder's output.
struct FrameSampler {
    scaler: ScalingContext,
    decoded: VideoFrame,
    rgb: VideoFrame,
    time_base: Rational,
    width: u32,
    height: u32,
    tolerance: f64,
    origin: Option<f64>,
    next: u64,
}

impl FrameSampler {
    fn is_done(&self, request: &SampleRequest<'_>) -> bool {
        self.next >= request.frame_limit
    }

    fn drain(
        &mut self,
        decoder: &mut VideoDecoder,
        request: &SampleRequest<'_>,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), FramezipError> {
        while !self.is_done(request) && decoder.receive_frame(&mut self.decoded).is_ok() {
            let pts = self
                .decoded
                .timestamp()
                .or_else(|| self.decoded.pts())
                .unwrap_or(0);
            let absolute = pts_to_seconds(pts, self.time_base);
            let origin = *self.origin.get_or_insert(absolute);
            let seconds = absolute - origin;

            let mut converted = false;
            while !self.is_done(request)
                && seconds + self.tolerance >= request.timestamp(self.next).as_secs_f64()
            {
                request.check_cancelled()?;
                if !converted {
                    self.scaler.run(&self.decoded, &mut self.rgb)?;
                    converted = true;
                }
                sink(rgb_frame_to_image(&self.rgb, self.width, self.height)?)?;
                self.next += 1;
            }
        }
        Ok(())
    }
}

/// Copy a scaled RGB24 frame into an image, dropping FFmpeg's row padding.
fn rgb_frame_to_image(
    rgb_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<DynamicImage, FramezipError> {
    let stride = rgb_frame.stride(0);
    let row_length = width as usize * 3;
    let data = rgb_frame.data(0);

    let buffer = if stride == row_length {
        data[..row_length * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_length * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            buffer.extend_from_slice(&data[start..start + row_length]);
        }
        buffer
    };

    let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        FramezipError::Conversion("decoded frame has an unexpected size".to_string())
    })?;
    Ok(DynamicImage::ImageRgb8(image))
}
