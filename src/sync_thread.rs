//! A background thread that periodically runs the SDK's config sync inside the error boundary.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    diagnostics::{Diagnostics, DiagnosticsContext},
    Error, ErrorBoundary, Result,
};

/// Timing of [`SyncThread`] ticks.
#[derive(Debug, Clone)]
pub struct SyncThreadConfig {
    /// Upper bound of the pause between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Each pause is shortened by a random amount in `0..=jitter`, so SDK instances started
    /// together drift apart.
    pub jitter: Duration,
}

impl SyncThreadConfig {
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_SYNC_JITTER: Duration = Duration::from_secs(1);

    pub fn new() -> SyncThreadConfig {
        SyncThreadConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> SyncThreadConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> SyncThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for SyncThreadConfig {
    fn default() -> SyncThreadConfig {
        SyncThreadConfig {
            interval: SyncThreadConfig::DEFAULT_SYNC_INTERVAL,
            jitter: SyncThreadConfig::DEFAULT_SYNC_JITTER,
        }
    }
}

/// A periodic sync thread.
///
/// Every tick runs the sync task through [`ErrorBoundary::capture_void`], so a panicking tick is
/// reported and the thread keeps going. After each tick, the `config_sync` diagnostics timeline is
/// cleared to bound memory; the task is expected to serialize it if it needs the markers.
pub struct SyncThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the sync thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl SyncThread {
    /// Start ticking every [`SyncThreadConfig::DEFAULT_SYNC_INTERVAL`].
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the OS refuses to spawn the thread.
    pub fn start(
        error_boundary: Arc<ErrorBoundary>,
        diagnostics: Arc<Diagnostics>,
        task: impl FnMut(&Diagnostics) + Send + 'static,
    ) -> Result<SyncThread> {
        SyncThread::start_with_config(error_boundary, diagnostics, task, SyncThreadConfig::default())
    }

    /// Start ticking with the given timing. The first tick runs immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the OS refuses to spawn the thread.
    pub fn start_with_config(
        error_boundary: Arc<ErrorBoundary>,
        diagnostics: Arc<Diagnostics>,
        mut task: impl FnMut(&Diagnostics) + Send + 'static,
        config: SyncThreadConfig,
    ) -> Result<SyncThread> {
        // One slot: a pending stop is all the thread needs to see.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("statsig-sync".to_owned())
            .spawn(move || loop {
                log::debug!(target: "statsig", "running sync tick");
                error_boundary.capture_void(|| task(diagnostics.as_ref()));
                diagnostics
                    .timeline(DiagnosticsContext::ConfigSync)
                    .clear_markers();

                let timeout = jitter(config.interval, config.jitter);
                match stop_receiver.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) => {
                        log::debug!(target: "statsig", "sync thread received stop command");
                        return;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        // Handle dropped without a stop: nobody owns this thread anymore.
                        log::debug!(target: "statsig", "sync thread handle dropped, exiting");
                        return;
                    }
                }
            })?;

        Ok(SyncThread {
            join_handle,
            stop_sender,
        })
    }

    /// Ask the thread to exit after its current tick. Does not wait.
    pub fn stop(&self) {
        // Full or disconnected both mean the thread is already on its way out.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and join it.
    ///
    /// # Errors
    ///
    /// - [`Error::SyncThreadPanicked`] if the thread panicked outside of the error boundary.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::SyncThreadPanicked)?;

        Ok(())
    }
}

/// `interval` minus a random amount up to `jitter`, floored at zero.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval.saturating_sub(thread_rng().gen_range(Duration::ZERO..=jitter))
}
