//! An HTTP client that talks to the Statsig API.
use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    retry::{retry, Attempt, Sleeper, ThreadSleeper, MAX_RETRIES},
    Error, Options, Result, SdkMetadata,
};

// Header names are case-insensitive on the wire; `HeaderName` requires lowercase.
pub(crate) const API_KEY_HEADER: HeaderName = HeaderName::from_static("statsig-api-key");
pub(crate) const CLIENT_TIME_HEADER: HeaderName = HeaderName::from_static("statsig-client-time");
pub(crate) const SESSION_ID_HEADER: HeaderName =
    HeaderName::from_static("statsig-server-session-id");
pub(crate) const SDK_TYPE_HEADER: HeaderName = HeaderName::from_static("statsig-sdk-type");
pub(crate) const SDK_VERSION_HEADER: HeaderName = HeaderName::from_static("statsig-sdk-version");

/// Per-attempt timeout shared by every request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    /// Status code returned by the server.
    pub status: StatusCode,
    /// Decoded JSON body. `None` if the server returned an empty body.
    pub body: Option<T>,
}

/// Sends signed JSON POST requests to the Statsig API.
///
/// Everything is fixed at construction: base URL, SDK key, session id and SDK metadata. Reuse the
/// same instance for the lifetime of the SDK, so it can reuse connections.
pub struct Transport {
    api: String,
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: Client,
    headers: HeaderMap,
    session_id: String,
    metadata: SdkMetadata,
    local_mode: bool,
    sleeper: Arc<dyn Sleeper + Send + Sync>,
}

impl Transport {
    /// Create a transport from SDK options.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the `api` override is not a valid URL.
    /// - [`Error::InvalidHeader`] if the SDK key or metadata cannot be sent as a header.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(options: &Options) -> Result<Transport> {
        let api = options.api();
        let api = api.strip_suffix('/').unwrap_or(api).to_owned();
        Url::parse(&api).map_err(Error::InvalidBaseUrl)?;

        let session_id = uuid::Uuid::new_v4().to_string();

        let mut headers = sdk_headers(&options.sdk_key, &options.metadata)?;
        headers.insert(SESSION_ID_HEADER, header_value(SESSION_ID_HEADER, &session_id)?);

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        log::debug!(target: "statsig", api = api.as_str(), session_id = session_id.as_str(); "created transport");

        Ok(Transport {
            api,
            client,
            headers,
            session_id,
            metadata: options.metadata.clone(),
            local_mode: options.local_mode,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Transport {
        self.client = Client::builder().timeout(timeout).build().unwrap();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper + Send + Sync>) -> Transport {
        self.sleeper = sleeper;
        self
    }

    /// Base URL requests are sent to, without a trailing slash.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Random identifier of this transport, sent as `STATSIG-SERVER-SESSION-ID`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// SDK metadata sent with every request.
    pub fn metadata(&self) -> &SdkMetadata {
        &self.metadata
    }

    /// POST `payload` to `endpoint` once.
    ///
    /// Returns `Ok(None)` without touching the network in local mode.
    pub fn post_request<T, R>(&self, endpoint: &str, payload: &T) -> Result<Option<Response<R>>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.post_request_internal(endpoint, payload, 0, Duration::ZERO)
    }

    /// POST `payload` to `endpoint`, retrying transient failures up to `retries` times (capped at
    /// [`MAX_RETRIES`]) with a backoff of 1s, 10s, 100s, ...
    ///
    /// Only connection errors and status codes 408, 500, 502, 503, 504, 522, 524 and 599 are
    /// retried. Any other non-2xx status is returned immediately.
    pub fn retryable_post_request<T, R>(
        &self,
        endpoint: &str,
        payload: &T,
        retries: u32,
    ) -> Result<Option<Response<R>>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.post_request_internal(endpoint, payload, retries.min(MAX_RETRIES), RETRY_BACKOFF)
    }

    fn post_request_internal<T, R>(
        &self,
        endpoint: &str,
        payload: &T,
        retries: u32,
        backoff: Duration,
    ) -> Result<Option<Response<R>>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if self.local_mode {
            log::trace!(target: "statsig", endpoint; "local mode, skipping request");
            return Ok(None);
        }

        let body = serde_json::to_vec(payload)?;
        let url = format!("{}{}", self.api, endpoint);

        let response = retry(retries, backoff, &*self.sleeper, || {
            self.send(&url, body.clone())
        })?;

        Ok(Some(response))
    }

    fn send<R: DeserializeOwned>(&self, url: &str, body: Vec<u8>) -> Attempt<Response<R>, Error> {
        log::debug!(target: "statsig", url; "sending request");
        let response = match self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CLIENT_TIME_HEADER, client_time())
            .body(body)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                // No response to classify, so the failure is treated as transient.
                log::warn!(target: "statsig", url; "error while sending request: {:?}", err);
                return Attempt::retry(Err(Error::from(err)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "statsig", url, status = status.as_u16(); "received non-2xx response");
            let result = Err(Error::UnexpectedStatus(status));
            return if should_retry(status) {
                Attempt::retry(result)
            } else {
                Attempt::done(result)
            };
        }

        Attempt::done(decode(status, response))
    }

    /// Issue a single unretried GET with caller-supplied headers. Used for resources hosted
    /// outside of the Statsig API, so no SDK headers are attached.
    ///
    /// Returns `Ok(None)` without touching the network in local mode.
    pub fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<reqwest::blocking::Response>> {
        if self.local_mode {
            log::trace!(target: "statsig", url; "local mode, skipping request");
            return Ok(None);
        }

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(Some(request.send()?))
    }
}

fn decode<R: DeserializeOwned>(
    status: StatusCode,
    response: reqwest::blocking::Response,
) -> Result<Response<R>> {
    let bytes = response.bytes()?;
    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice(&bytes)?)
    };
    Ok(Response { status, body })
}

/// Status codes signaling a transient, server-side failure.
pub(crate) fn should_retry(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 500 | 502 | 503 | 504 | 522 | 524 | 599
    )
}

pub(crate) fn client_time() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Headers identifying the SDK and authenticating it. Shared by the transport and the error
/// boundary client.
pub(crate) fn sdk_headers(sdk_key: &str, metadata: &SdkMetadata) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, header_value(API_KEY_HEADER, sdk_key)?);
    headers.insert(SDK_TYPE_HEADER, header_value(SDK_TYPE_HEADER, &metadata.sdk_type)?);
    headers.insert(
        SDK_VERSION_HEADER,
        header_value(SDK_VERSION_HEADER, &metadata.sdk_version)?,
    );
    Ok(headers)
}

fn header_value(name: HeaderName, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(name))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use reqwest::StatusCode;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::{should_retry, Transport};
    use crate::{retry::tests::RecordingSleeper, test_server::TestServer, Error, Options};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ack {
        success: bool,
    }

    fn transport(server: &TestServer) -> (Transport, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = Transport::new(&Options::from_sdk_key("secret-key").with_api(server.url()))
            .unwrap()
            .with_sleeper(sleeper.clone());
        (transport, sleeper)
    }

    #[test]
    fn whitelisted_codes_are_retried() {
        for code in [408, 500, 502, 503, 504, 522, 524, 599] {
            assert!(should_retry(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [400, 401, 403, 404, 429, 501] {
            assert!(!should_retry(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[test]
    fn retries_until_success() {
        let server = TestServer::start(|index, _| {
            if index < 2 {
                (StatusCode::SERVICE_UNAVAILABLE, String::new())
            } else {
                (StatusCode::OK, r#"{"success":true}"#.to_owned())
            }
        });
        let (transport, sleeper) = transport(&server);

        let response = transport
            .retryable_post_request::<_, Ack>("/log_event", &json!({"events": []}), 5)
            .unwrap()
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Some(Ack { success: true }));
        assert_eq!(server.request_count(), 3);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(10)]
        );
    }

    #[test]
    fn retry_budget_bounds_attempts() {
        let server = TestServer::start(|_, _| (StatusCode::BAD_GATEWAY, String::new()));
        let (transport, _sleeper) = transport(&server);

        let result = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 2);

        assert!(matches!(
            result,
            Err(Error::UnexpectedStatus(StatusCode::BAD_GATEWAY))
        ));
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn retry_budget_is_capped() {
        let server = TestServer::start(|_, _| (StatusCode::GATEWAY_TIMEOUT, String::new()));
        let (transport, sleeper) = transport(&server);

        let _ = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 100);

        assert_eq!(server.request_count(), 6);
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 5);
    }

    #[test]
    fn client_errors_are_not_retried() {
        for code in [400, 401, 403, 404] {
            let status = StatusCode::from_u16(code).unwrap();
            let server = TestServer::start(move |_, _| (status, String::new()));
            let (transport, sleeper) = transport(&server);

            let result = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 5);

            assert!(matches!(result, Err(Error::UnexpectedStatus(s)) if s == status));
            assert_eq!(server.request_count(), 1);
            assert!(sleeper.sleeps.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn post_request_makes_a_single_attempt() {
        let server = TestServer::start(|_, _| (StatusCode::SERVICE_UNAVAILABLE, String::new()));
        let (transport, _sleeper) = transport(&server);

        let result = transport.post_request::<_, Ack>("/log_event", &json!({}));

        assert!(result.is_err());
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn sends_sdk_headers_and_payload() {
        let server = TestServer::ok();
        let (transport, _sleeper) = transport(&server);

        transport
            .post_request::<_, serde_json::Value>("/log_event", &json!({"events": [1, 2]}))
            .unwrap();
        transport
            .post_request::<_, serde_json::Value>("/log_event", &json!({}))
            .unwrap();

        let requests = server.requests();
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/log_event");
        assert_eq!(request.header("statsig-api-key"), Some("secret-key"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("statsig-sdk-type"), Some("rust-server"));
        assert_eq!(
            request.header("statsig-sdk-version"),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(
            request.header("statsig-server-session-id"),
            Some(transport.session_id())
        );
        assert!(request
            .header("statsig-client-time")
            .unwrap()
            .parse::<i64>()
            .is_ok());
        assert_eq!(request.json(), json!({"events": [1, 2]}));

        // Session id stays the same for the lifetime of the transport.
        assert_eq!(
            requests[1].header("statsig-server-session-id"),
            Some(transport.session_id())
        );
    }

    #[test]
    fn empty_success_body_decodes_to_none() {
        let server = TestServer::start(|_, _| (StatusCode::ACCEPTED, String::new()));
        let (transport, _sleeper) = transport(&server);

        let response = transport
            .post_request::<_, Ack>("/log_event", &json!({}))
            .unwrap()
            .unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body, None);
    }

    #[test]
    fn malformed_success_body_is_not_retried() {
        let server = TestServer::start(|_, _| (StatusCode::OK, "not json".to_owned()));
        let (transport, sleeper) = transport(&server);

        let result = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 5);

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(server.request_count(), 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn local_mode_skips_network() {
        let server = TestServer::ok();
        let transport = Transport::new(
            &Options::from_sdk_key("secret-key")
                .with_api(server.url())
                .with_local_mode(true),
        )
        .unwrap();

        let single = transport.post_request::<_, Ack>("/log_event", &json!({}));
        let retried = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 5);

        assert!(matches!(single, Ok(None)));
        assert!(matches!(retried, Ok(None)));
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn unserializable_payload_fails_before_network() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("cannot serialize"))
            }
        }

        let server = TestServer::ok();
        let (transport, _sleeper) = transport(&server);

        let result = transport.retryable_post_request::<_, Ack>("/log_event", &Broken, 5);

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn connection_errors_are_retried() {
        // Bind and drop a listener to get a port nothing listens on.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = Transport::new(
            &Options::from_sdk_key("secret-key").with_api(format!("http://{addr}")),
        )
        .unwrap()
        .with_sleeper(sleeper.clone());

        let result = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 2);

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
    }

    #[test]
    fn timeouts_are_retried() {
        let server = TestServer::start(|_, _| {
            std::thread::sleep(Duration::from_millis(300));
            (StatusCode::OK, r#"{"success":true}"#.to_owned())
        });
        let (transport, sleeper) = transport(&server);
        let transport = transport.with_timeout(Duration::from_millis(50));

        let result = transport.retryable_post_request::<_, Ack>("/log_event", &json!({}), 2);

        assert!(matches!(&result, Err(Error::Network(err)) if err.is_timeout()));
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
    }

    #[test]
    fn local_mode_get_skips_network() {
        let server = TestServer::ok();
        let transport = Transport::new(
            &Options::from_sdk_key("secret-key")
                .with_api(server.url())
                .with_local_mode(true),
        )
        .unwrap();

        let response = transport
            .get(&format!("{}/bootstrap.json", server.url()), &HashMap::new())
            .unwrap();

        assert!(response.is_none());
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn invalid_sdk_key_names_the_header() {
        let result = Transport::new(&Options::from_sdk_key("bad\nkey"));

        match result {
            Err(Error::InvalidHeader(name)) => assert_eq!(name, "statsig-api-key"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn trims_trailing_slash_from_api() {
        let transport =
            Transport::new(&Options::from_sdk_key("secret-key").with_api("https://example.test/"))
                .unwrap();

        assert_eq!(transport.api(), "https://example.test");
    }

    #[test]
    fn rejects_invalid_api() {
        let result = Transport::new(&Options::from_sdk_key("secret-key").with_api("not a url"));

        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn get_forwards_caller_headers_only() {
        let server = TestServer::start(|_, _| (StatusCode::OK, r#"{"success":true}"#.to_owned()));
        let (transport, _sleeper) = transport(&server);

        let response = transport
            .get(
                &format!("{}/bootstrap.json", server.url()),
                &HashMap::from([("x-custom".to_owned(), "value".to_owned())]),
            )
            .unwrap()
            .unwrap();

        assert_eq!(response.json::<Ack>().unwrap(), Ack { success: true });
        let request = &server.requests()[0];
        assert_eq!(request.method, "GET");
        assert_eq!(request.header("x-custom"), Some("value"));
        assert_eq!(request.header("statsig-api-key"), None);
    }
}
