//! Ordered per-context timelines of start/end markers for SDK operations.
//!
//! Markers are recorded through a [`MarkerBuilder`] obtained by selecting a context:
//!
//! ```
//! # use statsig_resilience::Diagnostics;
//! let diagnostics = Diagnostics::new();
//! diagnostics.initialize().download_config_specs().network_request().start().mark();
//! diagnostics
//!     .initialize()
//!     .download_config_specs()
//!     .network_request()
//!     .end()
//!     .success(true)
//!     .status_code(200)
//!     .mark();
//!
//! assert_eq!(diagnostics.timeline(statsig_resilience::DiagnosticsContext::Initialize).len(), 2);
//! ```
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::output_logger::{LogCrateLogger, OutputLogger, Process};

mod messages;

pub(crate) use messages::status_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsContext {
    Initialize,
    ConfigSync,
    /// Calls into the public evaluation API, instrumented by the error boundary.
    ApiCall,
}

impl DiagnosticsContext {
    /// Process status lines of this context are attributed to. `None` for contexts that do not
    /// emit status lines.
    pub fn process(self) -> Option<Process> {
        match self {
            DiagnosticsContext::Initialize => Some(Process::Initialize),
            DiagnosticsContext::ConfigSync => Some(Process::Sync),
            DiagnosticsContext::ApiCall => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsKey {
    DownloadConfigSpecs,
    Bootstrap,
    GetIdListSources,
    GetIdList,
    Overall,
    DataStoreConfigSpecs,
    CheckGate,
    GetConfig,
    GetLayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsStep {
    NetworkRequest,
    Fetch,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsAction {
    Start,
    End,
}

/// Optional marker details. A missing tag is not the same as `false` or `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_list_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A single timestamped observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<DiagnosticsKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<DiagnosticsStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<DiagnosticsAction>,
    /// Milliseconds since Unix epoch at the moment the marker was recorded.
    pub timestamp: i64,
    #[serde(flatten)]
    pub tags: Tags,
}

/// Copy of a timeline, as transmitted to the telemetry backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub context: DiagnosticsContext,
    pub markers: Vec<Marker>,
}

/// Append-only list of markers for one context.
pub struct DiagnosticsTimeline {
    context: DiagnosticsContext,
    markers: RwLock<Vec<Marker>>,
}

impl DiagnosticsTimeline {
    fn new(context: DiagnosticsContext) -> DiagnosticsTimeline {
        DiagnosticsTimeline {
            context,
            markers: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> DiagnosticsContext {
        self.context
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the timeline. Later appends do not affect the returned value.
    pub fn serialize(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            context: self.context,
            markers: self.read().clone(),
        }
    }

    /// Drop all markers recorded so far.
    pub fn clear_markers(&self) {
        self.write().clear();
    }

    fn push(&self, marker: Marker) {
        self.write().push(marker);
    }

    // Markers are plain data, so a writer panicking mid-push cannot leave the vector in a state
    // worth refusing to read. Recovering the guard keeps diagnostics from ever crashing the host.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Marker>> {
        self.markers.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Marker>> {
        self.markers.write().unwrap_or_else(|err| err.into_inner())
    }
}

/// Diagnostics of one SDK instance: one independent timeline per [`DiagnosticsContext`].
pub struct Diagnostics {
    initialize: DiagnosticsTimeline,
    config_sync: DiagnosticsTimeline,
    api_call: DiagnosticsTimeline,
    logger: Arc<dyn OutputLogger + Send + Sync>,
}

impl Diagnostics {
    /// Create empty diagnostics that log status lines through the [`log`] crate.
    pub fn new() -> Diagnostics {
        Diagnostics::with_logger(Arc::new(LogCrateLogger))
    }

    pub(crate) fn with_logger(logger: Arc<dyn OutputLogger + Send + Sync>) -> Diagnostics {
        Diagnostics {
            initialize: DiagnosticsTimeline::new(DiagnosticsContext::Initialize),
            config_sync: DiagnosticsTimeline::new(DiagnosticsContext::ConfigSync),
            api_call: DiagnosticsTimeline::new(DiagnosticsContext::ApiCall),
            logger,
        }
    }

    pub fn timeline(&self, context: DiagnosticsContext) -> &DiagnosticsTimeline {
        match context {
            DiagnosticsContext::Initialize => &self.initialize,
            DiagnosticsContext::ConfigSync => &self.config_sync,
            DiagnosticsContext::ApiCall => &self.api_call,
        }
    }

    /// Start building a marker for `context`.
    pub fn marker(&self, context: DiagnosticsContext) -> MarkerBuilder<'_> {
        MarkerBuilder {
            diagnostics: self,
            context,
            key: None,
            step: None,
            action: None,
            tags: Tags::default(),
        }
    }

    pub fn initialize(&self) -> MarkerBuilder<'_> {
        self.marker(DiagnosticsContext::Initialize)
    }

    pub fn config_sync(&self) -> MarkerBuilder<'_> {
        self.marker(DiagnosticsContext::ConfigSync)
    }

    pub fn api_call(&self) -> MarkerBuilder<'_> {
        self.marker(DiagnosticsContext::ApiCall)
    }

    /// Record a marker in a single call.
    pub fn record(
        &self,
        context: DiagnosticsContext,
        key: DiagnosticsKey,
        step: Option<DiagnosticsStep>,
        action: DiagnosticsAction,
        tags: Tags,
    ) {
        MarkerBuilder {
            diagnostics: self,
            context,
            key: Some(key),
            step,
            action: Some(action),
            tags,
        }
        .mark();
    }

    /// Snapshots of every timeline.
    pub fn serialize_all(&self) -> Vec<DiagnosticsSnapshot> {
        [&self.initialize, &self.config_sync, &self.api_call]
            .into_iter()
            .map(DiagnosticsTimeline::serialize)
            .collect()
    }
}

impl Default for Diagnostics {
    fn default() -> Diagnostics {
        Diagnostics::new()
    }
}

/// A marker under construction. Nothing is recorded until [`MarkerBuilder::mark`] is called.
#[must_use = "markers are only recorded by calling `mark()`"]
pub struct MarkerBuilder<'a> {
    diagnostics: &'a Diagnostics,
    context: DiagnosticsContext,
    key: Option<DiagnosticsKey>,
    step: Option<DiagnosticsStep>,
    action: Option<DiagnosticsAction>,
    tags: Tags,
}

impl<'a> MarkerBuilder<'a> {
    pub fn key(mut self, key: DiagnosticsKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn download_config_specs(self) -> Self {
        self.key(DiagnosticsKey::DownloadConfigSpecs)
    }

    pub fn bootstrap(self) -> Self {
        self.key(DiagnosticsKey::Bootstrap)
    }

    pub fn get_id_list_sources(self) -> Self {
        self.key(DiagnosticsKey::GetIdListSources)
    }

    pub fn get_id_list(self) -> Self {
        self.key(DiagnosticsKey::GetIdList)
    }

    pub fn overall(self) -> Self {
        self.key(DiagnosticsKey::Overall)
    }

    pub fn data_store_config_specs(self) -> Self {
        self.key(DiagnosticsKey::DataStoreConfigSpecs)
    }

    pub fn step(mut self, step: DiagnosticsStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn network_request(self) -> Self {
        self.step(DiagnosticsStep::NetworkRequest)
    }

    pub fn fetch(self) -> Self {
        self.step(DiagnosticsStep::Fetch)
    }

    pub fn process(self) -> Self {
        self.step(DiagnosticsStep::Process)
    }

    pub fn start(mut self) -> Self {
        self.action = Some(DiagnosticsAction::Start);
        self
    }

    pub fn end(mut self) -> Self {
        self.action = Some(DiagnosticsAction::End);
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.tags.success = Some(success);
        self
    }

    pub fn status_code(mut self, status_code: u16) -> Self {
        self.tags.status_code = Some(status_code);
        self
    }

    pub fn sdk_region(mut self, sdk_region: impl Into<String>) -> Self {
        self.tags.sdk_region = Some(sdk_region.into());
        self
    }

    pub fn id_list_count(mut self, id_list_count: usize) -> Self {
        self.tags.id_list_count = Some(id_list_count);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.tags.url = Some(url.into());
        self
    }

    /// Timestamp the marker and append it to its context's timeline.
    pub fn mark(self) {
        let marker = Marker {
            key: self.key,
            step: self.step,
            action: self.action,
            timestamp: chrono::Utc::now().timestamp_millis(),
            tags: self.tags,
        };

        let message = match (marker.key, marker.action) {
            (Some(key), Some(action)) => {
                status_message(key, marker.step, action, marker.tags.success)
            }
            _ => None,
        };

        self.diagnostics.timeline(self.context).push(marker);

        if let (Some(process), Some(message)) = (self.context.process(), message) {
            self.diagnostics.logger.log_step(process, message);
        }
    }
}
