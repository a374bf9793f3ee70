use derive_more::Display;

/// Long-running SDK process a diagnostics status line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Process {
    #[display(fmt = "Initialize")]
    Initialize,
    #[display(fmt = "Sync")]
    Sync,
}

/// Local sink for operator-facing output: step progress lines emitted by diagnostics markers and
/// failures recovered by the error boundary.
///
/// Closures of shape `Fn(Option<Process>, &str)` work as a logger, receiving `None` for errors.
pub trait OutputLogger {
    /// Called with a human-readable status line whenever a marker with a known message is
    /// recorded.
    fn log_step(&self, process: Process, message: &str);

    /// Called every time the error boundary recovers from a failure, including repeated ones
    /// that are not reported to the network again.
    fn log_error(&self, message: &str);
}

/// Default logger that forwards everything to the [`log`] crate.
pub(crate) struct LogCrateLogger;

impl OutputLogger for LogCrateLogger {
    fn log_step(&self, process: Process, message: &str) {
        log::info!(target: "statsig", process:% = process; "{}", message);
    }

    fn log_error(&self, message: &str) {
        log::error!(target: "statsig", "{}", message);
    }
}

impl<T: Fn(Option<Process>, &str)> OutputLogger for T {
    fn log_step(&self, process: Process, message: &str) {
        self(Some(process), message);
    }

    fn log_error(&self, message: &str) {
        self(None, message);
    }
}
