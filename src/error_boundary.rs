//! Shields the host application from panics inside the SDK.
//!
//! Every public evaluation call runs through an [`ErrorBoundary`]. A panic in the wrapped task is
//! caught, logged locally, reported once per unique message to the exception collector, and
//! turned into a default value. The host never observes the panic.
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Once, RwLock},
};

use reqwest::{blocking::Client, header::CONTENT_TYPE};
use serde::Serialize;

use crate::{
    diagnostics::{Diagnostics, DiagnosticsKey},
    output_logger::OutputLogger,
    transport::{client_time, sdk_headers, CLIENT_TIME_HEADER, REQUEST_TIMEOUT},
    Error, Options, Result,
};

/// Path exception reports are posted to, relative to the collector base URL.
pub const ERROR_BOUNDARY_ENDPOINT: &str = "/sdk_exception";

/// Rendered message for a failure that carried no printable payload.
pub const UNKNOWN_FAILURE: &str = "Unknown";

const MAX_STACK_TRACE_BYTES: usize = 1024;

thread_local! {
    /// Number of boundaries currently running a task on this thread.
    static ACTIVE_CAPTURES: Cell<usize> = const { Cell::new(0) };
    /// Site of the last panic raised inside a boundary on this thread.
    static PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Where a panic was raised, recorded by the panic hook before unwinding starts.
struct PanicSite {
    location: Option<String>,
    backtrace: Backtrace,
}

impl PanicSite {
    fn render(&self) -> String {
        let backtrace = self.backtrace.to_string();
        let frames = skip_panic_machinery(&backtrace);
        match &self.location {
            Some(location) => format!("panicked at {}\n{}", location, frames),
            None => frames.to_owned(),
        }
    }
}

/// Install, once per process, a panic hook that records the panic site for boundaries and
/// silences the default panic message for panics they recover. Panics outside any boundary go to
/// the previously installed hook unchanged.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if ACTIVE_CAPTURES.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let site = PanicSite {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture(),
            };
            PANIC_SITE.with(|slot| *slot.borrow_mut() = Some(site));
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    PANIC_SITE.with(|slot| slot.borrow_mut().take())
}

/// Drop the leading frames of backtrace capture, the panic hook and the panic runtime, so the
/// rendered trace starts at the panicking function.
fn skip_panic_machinery(backtrace: &str) -> &str {
    const MACHINERY: &[&str] = &[
        "std::backtrace",
        "std::panicking::",
        "core::panicking::",
        "rust_begin_unwind",
        "__rust_end_short_backtrace",
        "error_boundary::install_panic_hook",
        "<alloc::boxed::Box<F,A> as core::ops::function::Fn",
    ];

    let mut start = 0;
    for line in backtrace.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("at ") && !MACHINERY.iter().any(|marker| trimmed.contains(marker)) {
            break;
        }
        start += line.len();
    }
    &backtrace[start..]
}

/// Public API operations instrumented with diagnostics markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    CheckGate,
    GetConfig,
    GetLayer,
}

impl ApiOperation {
    fn key(self) -> DiagnosticsKey {
        match self {
            ApiOperation::CheckGate => DiagnosticsKey::CheckGate,
            ApiOperation::GetConfig => DiagnosticsKey::GetConfig,
            ApiOperation::GetLayer => DiagnosticsKey::GetLayer,
        }
    }
}

/// A failure recovered by the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Rendered panic message. Also used as deduplication key.
    pub message: String,
}

/// Result of a wrapped task.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured<T> {
    /// The task returned normally.
    Ok(T),
    /// The task panicked and `value` was substituted.
    Recovered { value: T, failure: Failure },
}

impl<T> Captured<T> {
    /// The task's value, or the substitute if it panicked.
    pub fn into_value(self) -> T {
        match self {
            Captured::Ok(value) | Captured::Recovered { value, .. } => value,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, Captured::Recovered { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Captured::Ok(_) => None,
            Captured::Recovered { failure, .. } => Some(failure),
        }
    }
}

#[derive(Debug, Serialize)]
struct LogExceptionRequestBody<'a> {
    exception: &'a str,
    info: &'a str,
}

/// Catches panics in SDK operations and reports each unique one to the collector.
///
/// Exception reports use a dedicated HTTP client rather than the shared
/// [`Transport`](crate::Transport), so a misbehaving API endpoint cannot suppress them.
pub struct ErrorBoundary {
    url: String,
    client: Client,
    headers: reqwest::header::HeaderMap,
    local_mode: bool,
    /// Messages already reported. Never cleared: each message is reported at most once for the
    /// lifetime of the boundary.
    seen: RwLock<HashSet<String>>,
    diagnostics: Arc<Diagnostics>,
    logger: Arc<dyn OutputLogger + Send + Sync>,
}

impl ErrorBoundary {
    /// Create a boundary instrumenting `diagnostics`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the collector base URL is not a valid URL.
    /// - [`Error::InvalidHeader`] if the SDK key or metadata cannot be sent as a header.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(options: &Options, diagnostics: Arc<Diagnostics>) -> Result<ErrorBoundary> {
        let url = format!("{}{}", options.error_boundary_api(), ERROR_BOUNDARY_ENDPOINT);
        reqwest::Url::parse(&url).map_err(Error::InvalidBaseUrl)?;

        let headers = sdk_headers(&options.sdk_key, &options.metadata)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(ErrorBoundary {
            url,
            client,
            headers,
            local_mode: options.local_mode,
            seen: RwLock::new(HashSet::new()),
            diagnostics,
            logger: options.output_logger.clone(),
        })
    }

    /// Run `task`, marking start and end of `operation` in the `api_call` diagnostics. On panic,
    /// returns `T::default()`.
    pub fn capture<T: Default>(
        &self,
        operation: ApiOperation,
        task: impl FnOnce() -> T,
    ) -> Captured<T> {
        self.capture_with_fallback(operation, task, |_| T::default())
    }

    /// Like [`ErrorBoundary::capture`], with the substitute value computed by `fallback`.
    pub fn capture_with_fallback<T>(
        &self,
        operation: ApiOperation,
        task: impl FnOnce() -> T,
        fallback: impl FnOnce(&Failure) -> T,
    ) -> Captured<T> {
        let key = operation.key();
        self.diagnostics.api_call().key(key).start().mark();

        match self.run(task) {
            Ok(value) => {
                self.diagnostics.api_call().key(key).end().success(true).mark();
                Captured::Ok(value)
            }
            Err(failure) => {
                self.diagnostics.api_call().key(key).end().success(false).mark();
                let value = fallback(&failure);
                Captured::Recovered { value, failure }
            }
        }
    }

    /// Gate check. A panicking check evaluates to `false`.
    pub fn capture_check_gate(&self, task: impl FnOnce() -> bool) -> bool {
        self.capture(ApiOperation::CheckGate, task).into_value()
    }

    /// Config fetch. A panicking fetch returns the default config.
    pub fn capture_get_config<T: Default>(&self, task: impl FnOnce() -> T) -> T {
        self.capture(ApiOperation::GetConfig, task).into_value()
    }

    /// Layer fetch. A panicking fetch returns the default layer.
    pub fn capture_get_layer<T: Default>(&self, task: impl FnOnce() -> T) -> T {
        self.capture(ApiOperation::GetLayer, task).into_value()
    }

    /// Run `task` without diagnostics. Used for payloads handed to client SDKs for bootstrapping.
    pub fn capture_without_diagnostics<T: Default>(&self, task: impl FnOnce() -> T) -> Captured<T> {
        match self.run(task) {
            Ok(value) => Captured::Ok(value),
            Err(failure) => Captured::Recovered {
                value: T::default(),
                failure,
            },
        }
    }

    /// Run a fire-and-forget `task`, such as a background sync tick.
    pub fn capture_void(&self, task: impl FnOnce()) {
        let _ = self.run(task);
    }

    fn run<T>(&self, task: impl FnOnce() -> T) -> std::result::Result<T, Failure> {
        install_panic_hook();
        take_panic_site();

        ACTIVE_CAPTURES.with(|active| active.set(active.get() + 1));
        let result = catch_unwind(AssertUnwindSafe(task));
        ACTIVE_CAPTURES.with(|active| active.set(active.get() - 1));

        result.map_err(|payload| {
            let message = render_panic(payload.as_ref());
            self.logger.log_error(&message);
            self.report(&message, take_panic_site());
            Failure { message }
        })
    }

    /// Report a failure to the collector unless a failure with the same message was reported
    /// before. `None` is reported as [`UNKNOWN_FAILURE`]. The stack trace sent is the caller's.
    ///
    /// Best effort: the response and any send error are ignored.
    pub fn log_exception(&self, exception: Option<&str>) {
        self.report(exception.unwrap_or(UNKNOWN_FAILURE), None);
    }

    fn report(&self, exception: &str, site: Option<PanicSite>) {
        if self.check_seen(exception) {
            log::trace!(target: "statsig", exception; "exception already reported");
            return;
        }
        if self.local_mode {
            return;
        }

        // Without a recorded site (another hook replaced ours), fall back to the current stack.
        let stack_trace = match site {
            Some(site) => site.render(),
            None => Backtrace::force_capture().to_string(),
        };
        let body = LogExceptionRequestBody {
            exception,
            info: truncate(&stack_trace, MAX_STACK_TRACE_BYTES),
        };

        let result = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CLIENT_TIME_HEADER, client_time())
            .json(&body)
            .send();
        if let Err(err) = result {
            log::debug!(target: "statsig", "failed to report exception: {:?}", err);
        }
    }

    /// Returns `true` if `exception` was seen before, marking it as seen otherwise.
    fn check_seen(&self, exception: &str) -> bool {
        if let Ok(seen) = self.seen.read() {
            if seen.contains(exception) {
                return true;
            }
        }

        // Insert re-checks under the write lock, so concurrent first sightings report once.
        match self.seen.write() {
            Ok(mut seen) => !seen.insert(exception.to_owned()),
            // Poisoned lock: better to drop a report than to spam the collector.
            Err(_) => true,
        }
    }
}

fn render_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        UNKNOWN_FAILURE.to_owned()
    }
}

/// Truncate `s` to at most `max_bytes`, respecting char boundaries.
fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
