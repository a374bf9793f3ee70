use std::sync::Arc;

use crate::{
    output_logger::{LogCrateLogger, OutputLogger},
    Client, Result, SdkMetadata,
};

/// Configuration for [`Client`].
///
/// Everything is resolved once when the client is created; there is no hot reload.
#[derive(Clone)]
pub struct Options {
    pub(crate) sdk_key: String,
    pub(crate) api: Option<String>,
    pub(crate) error_boundary_api: Option<String>,
    pub(crate) local_mode: bool,
    pub(crate) metadata: SdkMetadata,
    pub(crate) output_logger: Arc<dyn OutputLogger + Send + Sync>,
}

impl Options {
    /// Default base URL for API calls and exception reports.
    pub const DEFAULT_API: &'static str = "https://statsigapi.net/v1";

    /// Create default options using the specified server SDK key.
    ///
    /// ```
    /// # use statsig_resilience::Options;
    /// Options::from_sdk_key("secret-key");
    /// ```
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> Options {
        Options {
            sdk_key: sdk_key.into(),
            api: None,
            error_boundary_api: None,
            local_mode: false,
            metadata: SdkMetadata::default(),
            output_logger: Arc::new(LogCrateLogger),
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    ///
    /// Unless [`Options::with_error_boundary_api`] is set, exception reports go here too.
    pub fn with_api(mut self, api: impl Into<String>) -> Options {
        self.api = Some(api.into());
        self
    }

    /// Override base URL exception reports are sent to.
    pub fn with_error_boundary_api(mut self, api: impl Into<String>) -> Options {
        self.error_boundary_api = Some(api.into());
        self
    }

    /// Disable all network calls. Requests succeed immediately with no response.
    pub fn with_local_mode(mut self, local_mode: bool) -> Options {
        self.local_mode = local_mode;
        self
    }

    /// Identify the host SDK in request headers.
    pub fn with_sdk_metadata(mut self, metadata: SdkMetadata) -> Options {
        self.metadata = metadata;
        self
    }

    /// Set logger receiving diagnostics step lines and recovered failures.
    ///
    /// ```
    /// # use statsig_resilience::{Options, Process};
    /// let options = Options::from_sdk_key("secret-key").with_output_logger(
    ///     |process: Option<Process>, message: &str| println!("{:?}: {}", process, message),
    /// );
    /// ```
    pub fn with_output_logger(mut self, logger: impl OutputLogger + Send + Sync + 'static) -> Options {
        self.output_logger = Arc::new(logger);
        self
    }

    pub(crate) fn api(&self) -> &str {
        self.api.as_deref().unwrap_or(Options::DEFAULT_API)
    }

    pub(crate) fn error_boundary_api(&self) -> &str {
        self.error_boundary_api.as_deref().unwrap_or_else(|| self.api())
    }

    /// Create a new [`Client`] using these options.
    ///
    /// ```
    /// # use statsig_resilience::{Client, Options};
    /// let client: Client = Options::from_sdk_key("secret-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}
