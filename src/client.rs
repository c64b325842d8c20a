use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::config::load_config;
use crate::error::{
    ApiEnvelope, Error, RequestScope, Result, error_from_envelope, error_from_status,
};
use crate::filesystem::FileSystem;
use crate::operation::{OperationJob, Operations};
use crate::poll::{CancellationToken, PollPolicy, PollStep, Poller};
use crate::process::{ProcessRef, Processes, Status};
use crate::util::{ensure_trailing_slash, urljoin};

/// Default SLIPO Workbench deployment.
pub const DEFAULT_BASE_URL: &str = "https://app.dev.slipo.eu/";
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const API_VERSION: &str = "v1";
const API_VALIDATE: &str = "key/validate/";

const HEADER_API_KEY: &str = "X-API-Key";
const HEADER_SESSION_TOKEN: &str = "X-API-Session-Token";

/// An application key generated with the SLIPO Workbench.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: key.into().trim().to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Base API URL, typically `https://app.dev.slipo.eu/`.
    pub url: String,
    /// SLIPO application key.
    pub key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Reject plain `http://` base URLs. When `false` they are accepted with a warning.
    pub requires_ssl: bool,
    /// Timeout of a single HTTP request.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            key: credentials.api_key,
            verify: true,
            requires_ssl: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolves the configuration from (in order of precedence):
    /// - explicit `url`/`key` arguments
    /// - environment variables `SLIPO_URL` / `SLIPO_API_KEY`
    /// - config file from `SLIPO_RC` or `.slipoapirc`
    ///
    /// The URL falls back to [`DEFAULT_BASE_URL`].
    pub fn resolve(url: Option<String>, key: Option<String>) -> Result<Self> {
        load_config(url, key)
    }

    pub fn with_requires_ssl(mut self, requires_ssl: bool) -> Self {
        self.requires_ssl = requires_ssl;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("verify", &self.verify)
            .field("requires_ssl", &self.requires_ssl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Connection and authentication state of one client.
///
/// Shared read-only by all clones of a [`Client`]; dropped with the last one.
pub struct Session {
    base_url: String,
    api_key: String,
    session_token: Option<String>,
    http: HttpClient,
}

impl Session {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Token returned by the server when the key was validated.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Entry point of the SLIPO API.
///
/// Resource families are reached through [`Client::files`], [`Client::catalog`],
/// [`Client::processes`] and [`Client::operations`].
#[derive(Debug, Clone)]
pub struct Client {
    session: Arc<Session>,
    progress: bool,
}

impl Client {
    /// Connects using environment variables and/or `.slipoapirc`.
    pub fn from_env() -> Result<Self> {
        Self::connect_with(ClientConfig::resolve(None, None)?)
    }

    /// Connects to `base_url` and validates the key.
    ///
    /// Fails with [`Error::Auth`] when the key is rejected and with
    /// [`Error::Network`] when the host cannot be reached.
    pub fn connect(base_url: &str, credentials: Credentials) -> Result<Self> {
        Self::connect_with(ClientConfig::new(base_url, credentials))
    }

    pub fn connect_with(config: ClientConfig) -> Result<Self> {
        let base_url = check_base_url(&config.url, config.requires_ssl)?;
        if config.key.is_empty() {
            return Err(Error::config("API key must not be empty"));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("slipo-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("slipo-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(config.timeout);

        if !config.verify {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        let mut session = Session {
            base_url,
            api_key: config.key,
            session_token: None,
            http,
        };
        session.session_token = validate_key(&session)?;

        tracing::debug!(base_url = %session.base_url, "connected");
        Ok(Self {
            session: Arc::new(session),
            progress: true,
        })
    }

    /// Shows a progress bar while downloading into local files.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn files(&self) -> FileSystem<'_> {
        FileSystem::new(self)
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self)
    }

    pub fn processes(&self) -> Processes<'_> {
        Processes::new(self)
    }

    pub fn operations(&self) -> Operations<'_> {
        Operations::new(self)
    }

    /// Re-queries the status of a process or operation until it is
    /// COMPLETED, FAILED or STOPPED.
    ///
    /// Returns the terminal status as soon as one is observed. Fails with
    /// [`Error::Timeout`] once `policy.timeout` elapses and with
    /// [`Error::Cancelled`] when `cancel` fires; neither stops the remote job.
    /// A zero `policy.interval` is rejected with [`Error::Config`].
    pub fn poll_until_terminal(
        &self,
        target: impl Into<ProcessRef>,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        let target = target.into();
        policy.validate()?;
        let mut poller = Poller::new(policy);
        let mut last_status: Option<Status> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    target: target.to_string(),
                });
            }

            let status = self.processes().status(target)?.status;
            if last_status != Some(status) {
                last_status = Some(status);
                tracing::info!(%target, %status, "status changed");
            }

            match poller.observe(status) {
                PollStep::Done(status) => return Ok(status),
                PollStep::Wait(delay) => {
                    if cancel.wait_timeout(delay) {
                        return Err(Error::Cancelled {
                            target: target.to_string(),
                        });
                    }
                }
                PollStep::TimedOut {
                    last_status,
                    elapsed,
                } => {
                    tracing::warn!(%target, %last_status, ?elapsed, "gave up waiting");
                    return Err(Error::Timeout {
                        target: target.to_string(),
                        last_status,
                        elapsed,
                    });
                }
            }
        }
    }

    /// Polls an operation until it finishes and returns the refreshed job,
    /// including its output artifact when it completed.
    pub fn wait_for_operation(
        &self,
        job: &OperationJob,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<OperationJob> {
        self.poll_until_terminal(job.reference(), policy, cancel)?;
        self.operations().status(job)
    }

    pub(crate) fn progress(&self) -> bool {
        self.progress
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        urljoin(
            &self.session.base_url,
            &format!("api/{}/{}", API_VERSION, path.trim_start_matches('/')),
        )
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.session
            .http
            .request(method, url)
            .header(HEADER_API_KEY, self.session.api_key.as_str())
    }

    /// Sends a request and maps transport failures and non-2xx statuses.
    pub(crate) fn execute(&self, req: RequestBuilder, url: &str) -> Result<Response> {
        execute(req, url, RequestScope::Resource)
    }

    pub(crate) fn get_json<TResp: DeserializeOwned>(&self, path: &str) -> Result<TResp> {
        self.api_json::<(), TResp>(Method::GET, path, None)
    }

    pub(crate) fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp> {
        self.api_json(Method::POST, path, Some(body))
    }

    pub(crate) fn api_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&TReq>,
    ) -> Result<TResp> {
        let url = self.endpoint(path);
        let mut req = self.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = self.execute(req, &url)?;
        self.read_json(resp, &url)
    }

    /// Decodes the `result` of a JSON envelope.
    pub(crate) fn read_json<TResp: DeserializeOwned>(&self, resp: Response, url: &str) -> Result<TResp> {
        read_envelope(resp, url, RequestScope::Resource)?.into_result(url)
    }
}

fn check_base_url(url: &str, requires_ssl: bool) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::config("base URL must not be empty"));
    }
    if !url.starts_with("https://") {
        if !url.starts_with("http://") {
            return Err(Error::config(format!(
                "base URL must start with https:// (got {})",
                url
            )));
        }
        if requires_ssl {
            return Err(Error::config("HTTPS should be used for API requests"));
        }
        tracing::warn!(%url, "using an API key over an unsecured connection");
    }
    Ok(ensure_trailing_slash(url))
}

fn validate_key(session: &Session) -> Result<Option<String>> {
    let url = urljoin(
        &session.base_url,
        &format!("api/{}/{}", API_VERSION, API_VALIDATE),
    );
    let req = session
        .http
        .get(&url)
        .header(HEADER_API_KEY, session.api_key.as_str());
    let resp = execute(req, &url, RequestScope::Validate)?;

    let token = resp
        .headers()
        .get(HEADER_SESSION_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if token.is_none() {
        tracing::debug!("server did not return a session token");
    }

    read_envelope(resp, &url, RequestScope::Validate)?;
    Ok(token)
}

fn execute(req: RequestBuilder, url: &str, scope: RequestScope) -> Result<Response> {
    let resp = req.send().map_err(|e| Error::transport(url, e))?;
    let status = resp.status();
    tracing::debug!(%url, status = status.as_u16(), "response");

    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        return Err(error_from_status(status, url, &text, scope));
    }
    Ok(resp)
}

fn read_envelope(resp: Response, url: &str, scope: RequestScope) -> Result<ApiEnvelope> {
    let text = resp.text().map_err(|e| Error::transport(url, e))?;
    let envelope: ApiEnvelope = serde_json::from_str(&text).map_err(|e| Error::Decode {
        url: url.to_string(),
        message: format!("invalid JSON envelope: {}", e),
    })?;
    if !envelope.success {
        return Err(error_from_envelope(&envelope, url, scope));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plain_http_by_default() {
        let err = check_base_url("http://127.0.0.1", true).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn accepts_plain_http_when_allowed() {
        assert_eq!(
            check_base_url("http://127.0.0.1", false).unwrap(),
            "http://127.0.0.1/"
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = check_base_url("ftp://app.dev.slipo.eu", false).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn appends_trailing_slash() {
        assert_eq!(
            check_base_url("https://app.dev.slipo.eu", true).unwrap(),
            "https://app.dev.slipo.eu/"
        );
    }

    #[test]
    fn debug_output_redacts_key() {
        let cfg = ClientConfig::new(DEFAULT_BASE_URL, Credentials::api_key("secret-key"));
        assert!(!format!("{:?}", cfg).contains("secret-key"));
        assert!(!format!("{:?}", Credentials::api_key("secret-key")).contains("secret-key"));
    }
}
