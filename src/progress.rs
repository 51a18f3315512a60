//! Progress reporting and cancellation support.
//!
//! Long-running operations (frame sampling and archive packing) report
//! their completion as an integer percentage. Each invocation gets its own
//! channel:
//!
//! - a [`ProgressSubscription`] held by the observer for the lifetime of
//!   the invocation; dropping it unsubscribes, after which no callback
//!   fires for that invocation,
//! - one or more [`ProgressReporter`] clones handed to the producer.
//!
//! The reporter enforces the channel contract: percentages are clamped to
//! `0..=100`, never go backwards, and the terminal `100` is delivered at
//! most once and only by [`ProgressReporter::finish`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use framezip::{OperationType, ProgressCallback, ProgressInfo, ProgressSubscription};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[{:?}] {}%", info.operation, info.percentage);
//!     }
//! }
//!
//! let subscription = ProgressSubscription::new(Arc::new(PrintProgress), OperationType::Export);
//! let reporter = subscription.reporter();
//! reporter.report_items(1, Some(4));
//! reporter.finish();
//! drop(subscription);
//! ```

use std::pin::Pin;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::Stream;

/// The kind of operation currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Sampling frames from a video into temporary storage.
    Conversion,
    /// Packing stored frames into an archive.
    Export,
}

/// A snapshot of operation progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// Completion percentage in `0..=100`.
    pub percentage: u8,
    /// How many items (frames) have been processed so far.
    pub current: u64,
    /// Total items expected, if known ahead of time.
    pub total: Option<u64>,
    /// Wall-clock time elapsed since the operation started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
}

/// Trait for receiving progress updates.
///
/// Implementations must be [`Send`] and [`Sync`] because producers run on
/// blocking worker threads.
///
/// Callbacks run while the channel is locked. They must not call back into
/// the [`ProgressReporter`] that triggered them.
pub trait ProgressCallback: Send + Sync {
    /// Called every time the percentage advances.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request
/// cancellation. Engines check [`is_cancelled`](CancellationToken::is_cancelled)
/// before each frame they write.
///
/// # Example
///
/// ```
/// use framezip::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ChannelState {
    callback: Option<Arc<dyn ProgressCallback>>,
    operation: OperationType,
    started: Instant,
    current: u64,
    total: Option<u64>,
    last_percentage: Option<u8>,
    finished: bool,
}

impl ChannelState {
    fn emit(&mut self, percentage: u8) {
        if self.finished {
            return;
        }
        if self.last_percentage.is_some_and(|last| percentage <= last) {
            return;
        }

        self.last_percentage = Some(percentage);
        if percentage == 100 {
            self.finished = true;
        }

        let Some(callback) = &self.callback else {
            return;
        };

        let elapsed = self.started.elapsed();
        let estimated_remaining = match self.total {
            Some(total) if self.current > 0 && total >= self.current => {
                let per_item = elapsed.div_f64(self.current as f64);
                Some(per_item.mul_f64((total - self.current) as f64))
            }
            _ => None,
        };

        let info = ProgressInfo {
            operation: self.operation,
            percentage,
            current: self.current,
            total: self.total,
            elapsed,
            estimated_remaining,
        };
        callback.on_progress(&info);
    }
}

fn lock(shared: &Mutex<ChannelState>) -> MutexGuard<'_, ChannelState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The observer side of a per-invocation progress channel.
///
/// Create one before starting an operation and keep it alive until the
/// operation's result has been observed. Dropping the subscription (or
/// calling [`unsubscribe`](ProgressSubscription::unsubscribe)) detaches the
/// callback; reporters that outlive it keep working but reach nobody.
pub struct ProgressSubscription {
    shared: Arc<Mutex<ChannelState>>,
}

impl ProgressSubscription {
    /// Subscribe `callback` to a new channel for one `operation`.
    pub fn new(callback: Arc<dyn ProgressCallback>, operation: OperationType) -> Self {
        Self {
            shared: Arc::new(Mutex::new(ChannelState {
                callback: Some(callback),
                operation,
                started: Instant::now(),
                current: 0,
                total: None,
                last_percentage: None,
                finished: false,
            })),
        }
    }

    /// A producer handle for this channel.
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The most recent percentage delivered on this channel.
    pub fn last_percentage(&self) -> Option<u8> {
        lock(&self.shared).last_percentage
    }

    /// Detach the callback. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        // Taking the lock waits for a callback that is mid-flight.
        lock(&self.shared).callback = None;
    }
}

/// The producer side of a per-invocation progress channel.
///
/// Cheap to clone; every clone feeds the same channel.
#[derive(Clone)]
pub struct ProgressReporter {
    shared: Arc<Mutex<ChannelState>>,
}

impl ProgressReporter {
    /// A reporter with no subscriber, for running an engine directly.
    pub fn detached(operation: OperationType) -> Self {
        ProgressSubscription::new(Arc::new(NoOpProgress), operation).reporter()
    }

    /// Report frame-granular progress: `current` of `total` items done.
    ///
    /// Intermediate reports stop at 99; only [`finish`](Self::finish)
    /// reports 100. When `total` is unknown or zero only the item count
    /// is recorded.
    pub fn report_items(&self, current: u64, total: Option<u64>) {
        let mut state = lock(&self.shared);
        state.current = current;
        state.total = total;

        let Some(total) = total.filter(|&total| total > 0) else {
            return;
        };
        let percentage = (current.saturating_mul(100) / total).min(99) as u8;
        state.emit(percentage);
    }

    /// Report a coarse percentage from a source without item counts.
    ///
    /// Values are clamped to 99, see [`report_items`](Self::report_items).
    pub fn report_percentage(&self, percentage: u8) {
        lock(&self.shared).emit(percentage.min(99));
    }

    /// Report completion. Emits the terminal 100 exactly once.
    pub fn finish(&self) {
        let mut state = lock(&self.shared);
        if let Some(total) = state.total {
            state.current = state.current.max(total);
        }
        state.emit(100);
    }

    /// Whether [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        lock(&self.shared).finished
    }
}

/// A [`ProgressCallback`] that forwards every update into a [`ProgressStream`].
struct ChannelProgress {
    sender: UnboundedSender<ProgressInfo>,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        // The stream may have been dropped; progress is advisory.
        let _ = self.sender.send(info.clone());
    }
}

/// An async stream of progress snapshots.
///
/// Created by [`progress_channel`]. Implements [`tokio_stream::Stream`];
/// the stream ends once every clone of the paired callback is dropped.
pub struct ProgressStream {
    receiver: UnboundedReceiver<ProgressInfo>,
}

impl Stream for ProgressStream {
    type Item = ProgressInfo;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Create a callback/stream pair for consuming progress asynchronously.
///
/// # Example
///
/// ```
/// use framezip::{OperationType, ProgressSubscription, progress_channel};
/// use tokio_stream::StreamExt;
///
/// # async fn example() {
/// let (callback, mut stream) = progress_channel();
/// let subscription = ProgressSubscription::new(callback, OperationType::Conversion);
/// subscription.reporter().finish();
/// drop(subscription);
///
/// let last = stream.next().await.unwrap();
/// assert_eq!(last.percentage, 100);
/// # }
/// ```
pub fn progress_channel() -> (Arc<dyn ProgressCallback>, ProgressStream) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    (
        Arc::new(ChannelProgress { sender }),
        ProgressStream { receiver },
    )
}
