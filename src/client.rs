use std::{collections::HashMap, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    diagnostics::{Diagnostics, DiagnosticsContext},
    sync_thread::{SyncThread, SyncThreadConfig},
    ErrorBoundary, Options, Result, Transport,
};

/// Path config specs are downloaded from, relative to the API base URL.
pub const DOWNLOAD_CONFIG_SPECS_ENDPOINT: &str = "/download_config_specs";

/// Resilience layer of one SDK instance.
///
/// Owns the [`Transport`], the [`ErrorBoundary`] and the [`Diagnostics`] they share. In order to
/// create a client instance, first create [`Options`].
///
/// # Examples
/// ```
/// # use statsig_resilience::{Client, Options};
/// let client = Client::new(Options::from_sdk_key("secret-key").with_local_mode(true)).unwrap();
/// assert!(client.error_boundary().capture_check_gate(|| true));
/// ```
pub struct Client {
    transport: Arc<Transport>,
    error_boundary: Arc<ErrorBoundary>,
    diagnostics: Arc<Diagnostics>,
}

impl Client {
    /// Create a new `Client` using the specified options.
    ///
    /// # Errors
    ///
    /// Fails if the configured base URLs are invalid, the SDK key cannot be sent as a header, or
    /// an HTTP client cannot be initialized.
    pub fn new(options: Options) -> Result<Client> {
        let diagnostics = Arc::new(Diagnostics::with_logger(options.output_logger.clone()));
        let transport = Arc::new(Transport::new(&options)?);
        let error_boundary = Arc::new(ErrorBoundary::new(&options, diagnostics.clone())?);

        log::debug!(target: "statsig", session_id = transport.session_id(); "created client");

        Ok(Client {
            transport,
            error_boundary,
            diagnostics,
        })
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn error_boundary(&self) -> &Arc<ErrorBoundary> {
        &self.error_boundary
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Download config specs updated after `since_time`, bracketing the request with
    /// `download_config_specs` network markers in `context`.
    ///
    /// Returns `Ok(None)` in local mode.
    pub fn download_config_specs<R: DeserializeOwned>(
        &self,
        context: DiagnosticsContext,
        since_time: i64,
    ) -> Result<Option<R>> {
        self.diagnostics
            .marker(context)
            .download_config_specs()
            .network_request()
            .start()
            .mark();

        let result = self.transport.post_request::<_, R>(
            DOWNLOAD_CONFIG_SPECS_ENDPOINT,
            &json!({ "sinceTime": since_time }),
        );

        let end = self
            .diagnostics
            .marker(context)
            .download_config_specs()
            .network_request()
            .end();
        match &result {
            Ok(Some(response)) => end.success(true).status_code(response.status.as_u16()).mark(),
            Ok(None) => end.success(true).mark(),
            Err(err) => {
                log::warn!(target: "statsig", "failed to download config specs: {}", err);
                match err.status_code() {
                    Some(status) => end.success(false).status_code(status.as_u16()).mark(),
                    None => end.success(false).mark(),
                }
            }
        }

        Ok(result?.and_then(|response| response.body))
    }

    /// Fetch a resource hosted outside of the Statsig API. See [`Transport::get`].
    pub fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<reqwest::blocking::Response>> {
        self.transport.get(url, headers)
    }

    /// Start a thread running `task` periodically inside the error boundary. The `config_sync`
    /// timeline is cleared after every tick.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`](crate::Error::Io) if the thread cannot be spawned.
    pub fn start_sync_thread(
        &self,
        task: impl FnMut(&Diagnostics) + Send + 'static,
        config: SyncThreadConfig,
    ) -> Result<SyncThread> {
        SyncThread::start_with_config(
            self.error_boundary.clone(),
            self.diagnostics.clone(),
            task,
            config,
        )
    }
}
