//! HTTP reporting backend
//!
//! Posts run reports either to the hosted API or to a local control-plane
//! process (the CLI server that wraps a test command). Both speak the same
//! JSON contract; they differ only in base URL and authentication.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::*;
use crate::error::{ReportError, ReportResult};

/// Default hosted API base URL
pub const DEFAULT_API_URL: &str = "https://api.evalrun.dev";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable naming a local control-plane address
pub const ENV_CLI_SERVER_ADDRESS: &str = "EVALRUN_CLI_SERVER_ADDRESS";
/// Environment variable overriding the hosted API URL
pub const ENV_API_URL: &str = "EVALRUN_API_URL";
/// Environment variable holding the hosted API key
pub const ENV_API_KEY: &str = "EVALRUN_API_KEY";
/// Environment variable overriding the request timeout
pub const ENV_TIMEOUT_SECS: &str = "EVALRUN_TIMEOUT_SECS";

/// Which kind of process receives the reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTarget {
    /// Hosted API, authenticated with an API key
    HostedApi,
    /// Local control-plane process, unauthenticated
    LocalControlPlane,
}

/// HTTP backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Target kind
    pub target: BackendTarget,
    /// Base URL every endpoint is joined onto
    pub base_url: String,
    /// Bearer token (hosted API only)
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HttpBackendConfig {
    /// Config for the hosted API at the default URL.
    pub fn hosted(api_key: &str) -> Self {
        HttpBackendConfig {
            target: BackendTarget::HostedApi,
            base_url: format!("{DEFAULT_API_URL}/testing/local"),
            api_key: Some(api_key.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }

    /// Config for a local control-plane process listening on `address`.
    pub fn local_control_plane(address: &str) -> Self {
        HttpBackendConfig {
            target: BackendTarget::LocalControlPlane,
            base_url: address.trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }

    /// Create a config from environment variables.
    ///
    /// A control-plane address takes precedence over the hosted API.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CLI_SERVER_ADDRESS) {
            Some(address) if !address.is_empty() => Self::local_control_plane(&address),
            _ => {
                let base = lookup(ENV_API_URL).unwrap_or_else(|| DEFAULT_API_URL.to_string());
                HttpBackendConfig {
                    target: BackendTarget::HostedApi,
                    base_url: format!("{}/testing/local", base.trim_end_matches('/')),
                    api_key: lookup(ENV_API_KEY),
                    timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                    user_agent: default_user_agent(),
                }
            }
        };
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS).and_then(|s| s.parse::<u64>().ok()) {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Join an endpoint path onto the base URL
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn default_user_agent() -> String {
    format!("evalrun-reporting/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    #[serde(alias = "id")]
    run_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    #[serde(alias = "id")]
    result_id: String,
}

/// Reporting backend speaking JSON over HTTP
pub struct HttpReportingBackend {
    config: HttpBackendConfig,
    http_client: reqwest::Client,
}

impl HttpReportingBackend {
    /// Create a new backend
    pub fn new(config: HttpBackendConfig) -> ReportResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| ReportError::Transport {
                endpoint: "client".to_string(),
                message: e.to_string(),
            })?;

        Ok(HttpReportingBackend {
            config,
            http_client,
        })
    }

    /// Create a backend from environment variables
    pub fn from_env() -> ReportResult<Self> {
        Self::new(HttpBackendConfig::from_env())
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ReportResult<reqwest::Response> {
        let url = self.config.endpoint_url(endpoint);
        debug!(url = %url, "posting report");

        let mut request = self.http_client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ReportError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> ReportResult<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self.post(endpoint, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| ReportError::Serialization(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl ReportingBackend for HttpReportingBackend {
    async fn start(&self, request: StartRequest) -> ReportResult<RunId> {
        let response: StartResponse = self.post_json("start", &request).await?;
        Ok(RunId(response.run_id))
    }

    async fn result(&self, report: ResultReport) -> ReportResult<ResultId> {
        let response: ResultResponse = self.post_json("results", &report).await?;
        Ok(ResultId(response.result_id))
    }

    async fn eval(&self, report: EvalReport) -> ReportResult<()> {
        self.post("evals", &report).await.map(|_| ())
    }

    async fn error(&self, report: ErrorReport) -> ReportResult<()> {
        self.post("errors", &report).await.map(|_| ())
    }

    async fn end(&self, request: EndRequest) -> ReportResult<()> {
        self.post("end", &request).await.map(|_| ())
    }

    async fn event(&self, report: EventReport) -> ReportResult<()> {
        self.post("events", &report).await.map(|_| ())
    }

    async fn human_review_job(&self, request: HumanReviewJobRequest) -> ReportResult<()> {
        let endpoint = format!("runs/{}/human-review-job", request.run_id);
        self.post(&endpoint, &request).await.map(|_| ())
    }
}
