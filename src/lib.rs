//! Resilience and self-instrumentation layer of the Statsig server SDK.
//!
//! # Overview
//!
//! The crate makes the SDK's outbound calls safe and observable. The host SDK owns flag
//! evaluation and config parsing; this crate provides three primitives around them:
//!
//! - [`Transport`] sends signed JSON POST requests to the Statsig API, retrying transient failures
//!   with exponential backoff (see [`retry`]).
//! - [`ErrorBoundary`] wraps calls into the public API. A panic inside a wrapped call is caught,
//!   logged locally, reported once per unique message to the exception collector, and replaced
//!   with a default value. The host never observes the panic.
//! - [`Diagnostics`] records ordered start/end markers of SDK operations per
//!   [`DiagnosticsContext`], for transmission along with the SDK's own events.
//!
//! A [`Client`] owns one of each for the lifetime of an SDK instance. Create it from [`Options`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Transport errors are returned to the caller,
//! which decides whether to fall back to a cached or bootstrapped source. Failures inside the
//! error boundary are never returned.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `statsig` target.
//! Diagnostics status lines and recovered failures go to an [`OutputLogger`], which forwards to
//! `log` unless [`Options::with_output_logger`] replaces it.
//!
//! # Local mode
//!
//! [`Options::with_local_mode`] disables all network calls. Requests succeed with no response and
//! exception reports are skipped.

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
pub mod diagnostics;
mod error;
mod error_boundary;
mod output_logger;
pub mod retry;
mod sdk_metadata;
mod sync_thread;
mod transport;

#[cfg(test)]
mod test_server;

pub use client::{Client, DOWNLOAD_CONFIG_SPECS_ENDPOINT};
pub use config::Options;
pub use diagnostics::{
    Diagnostics, DiagnosticsAction, DiagnosticsContext, DiagnosticsKey, DiagnosticsSnapshot,
    DiagnosticsStep, DiagnosticsTimeline, Marker, MarkerBuilder, Tags,
};
pub use error::{Error, Result};
pub use error_boundary::{
    ApiOperation, Captured, ErrorBoundary, Failure, ERROR_BOUNDARY_ENDPOINT, UNKNOWN_FAILURE,
};
pub use output_logger::{OutputLogger, Process};
pub use sdk_metadata::SdkMetadata;
pub use sync_thread::{SyncThread, SyncThreadConfig};
pub use transport::{Response, Transport, REQUEST_TIMEOUT};
