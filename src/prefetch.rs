//! Prefetch Worker - background batch production
//!
//! Toyota Way: Just-in-Time
//! - The next batch is prepared while the current step runs
//! - The single-slot channel keeps at most one batch waiting (no overproduction)
//!
//! The worker owns the [`BatchSource`] while running; the thread hands it back
//! on exit so the same source can be restarted after a stop.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::batch::Batch;
use crate::channel::BatchChannel;
use crate::{Error, Result};

/// Name of the prefetch thread.
pub const WORKER_THREAD_NAME: &str = "prefetch";

/// Cooperative cancellation for a running [`BatchSource`].
///
/// Raised by [`PrefetchWorker::stop`]. Sources that wait (on I/O, a timer,
/// another queue) should wait through [`sleep`](Self::sleep) or poll
/// [`is_stopped`](Self::is_stopped) so a stop never waits on them.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    /// Create a token that is not stopped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token, waking every [`sleep`](Self::sleep).
    pub fn stop(&self) {
        let (stopped, wake) = &*self.state;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    /// Whether the token has been raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `duration`, returning early when the token is raised.
    ///
    /// Returns `true` if the token was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (stopped, wake) = &*self.state;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Opaque data pipeline feeding the worker.
pub trait BatchSource: Send {
    /// Produce the next training batch.
    ///
    /// Any wait inside this call should honour `stop`: once it is raised the
    /// worker discards whatever this call returns, so a source may bail out
    /// with any error (for example [`Error::Interrupted`]). A source that
    /// ignores `stop` delays [`PrefetchWorker::stop`] until the call returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceExhausted`] when no batches are left, or
    /// [`Error::Source`] if batch preparation failed. The worker never retries.
    fn next_batch(&mut self, stop: &StopToken) -> Result<Batch>;

    /// Release resources after the worker stopped.
    fn release(&mut self) {}

    /// JSON description stored in the run document.
    fn describe(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

type FailureSlot = Arc<Mutex<Option<Error>>>;

/// Owns the background thread that keeps the [`BatchChannel`] full.
pub struct PrefetchWorker {
    source: Option<Box<dyn BatchSource>>,
    description: serde_json::Value,
    channel: Arc<BatchChannel>,
    stop: StopToken,
    failure: FailureSlot,
    handle: Option<JoinHandle<Box<dyn BatchSource>>>,
}

impl PrefetchWorker {
    /// Create a stopped worker around `source`.
    #[must_use]
    pub fn new(source: Box<dyn BatchSource>) -> Self {
        let description = source.describe();
        Self {
            source: Some(source),
            description,
            channel: Arc::new(BatchChannel::new()),
            stop: StopToken::new(),
            failure: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// Spawn the worker thread with a fresh channel.
    ///
    /// Starting a running worker is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the source was lost to an earlier
    /// worker panic, or [`Error::Io`] if the thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("prefetch worker already running");
            return Ok(());
        }
        let source = self.source.take().ok_or_else(|| {
            Error::InvalidState("batch source was lost when the prefetch worker panicked".into())
        })?;

        self.channel = Arc::new(BatchChannel::new());
        self.stop = StopToken::new();
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let channel = Arc::clone(&self.channel);
        let stop = self.stop.clone();
        let failure = Arc::clone(&self.failure);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || produce(source, &channel, &stop, &failure))?;
        self.handle = Some(handle);

        tracing::info!("prefetch worker started");
        Ok(())
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Raising the [`StopToken`] wakes a source waiting inside
    /// [`BatchSource::next_batch`]; closing the channel wakes a producer
    /// blocked in `put`. The source's `release` hook runs once the thread
    /// has exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if the thread panicked.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.stop();
        self.channel.close();

        let mut source = handle.join().map_err(|_| Error::WorkerPanicked)?;
        source.release();
        self.source = Some(source);
        tracing::info!("prefetch worker stopped");
        Ok(())
    }

    /// Whether the worker thread has been started and not yet stopped.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Channel of the current (or most recent) run.
    #[must_use]
    pub fn channel(&self) -> Arc<BatchChannel> {
        Arc::clone(&self.channel)
    }

    /// Take the source failure that closed the channel, if any.
    #[must_use]
    pub fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Source description captured at construction.
    #[must_use]
    pub const fn describe(&self) -> &serde_json::Value {
        &self.description
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "prefetch worker did not shut down cleanly");
        }
    }
}

impl std::fmt::Debug for PrefetchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchWorker")
            .field("running", &self.is_running())
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Finishes the channel when the producer exits, including by unwinding.
struct FinishOnExit<'a>(&'a BatchChannel);

impl Drop for FinishOnExit<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

fn produce(
    mut source: Box<dyn BatchSource>,
    channel: &BatchChannel,
    stop: &StopToken,
    failure: &Mutex<Option<Error>>,
) -> Box<dyn BatchSource> {
    let _finish = FinishOnExit(channel);
    while !stop.is_stopped() {
        let batch = match source.next_batch(stop) {
            Ok(batch) => batch,
            Err(e) => {
                if !stop.is_stopped() {
                    if matches!(e, Error::SourceExhausted) {
                        tracing::info!("batch source exhausted");
                    } else {
                        tracing::warn!(error = %e, "batch source failed");
                    }
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                }
                break;
            }
        };
        tracing::trace!(source_id = batch.source_id(), "batch prepared");
        if channel.put(batch).is_err() {
            break;
        }
    }
    source
}
