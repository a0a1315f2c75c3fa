use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};

use crate::config::RunConfig;
use crate::error::{Result, RunError};
use crate::gate::{self, GATE_STATUS_PATH, GateSource, QualityGateResult};
use crate::poll::{self, TaskInfo, TaskSource};
use crate::scan::JobHandle;

/// HTTP access to the analysis server.
#[derive(Debug, Clone)]
pub struct SonarClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl SonarClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RunError::InvalidConfig(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(config.base_url(), config.token.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Token goes in as the basic-auth user with an empty password.
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) if !token.is_empty() => req.basic_auth(token, None::<&str>),
            _ => req,
        }
    }
}

impl TaskSource for SonarClient {
    async fn fetch_task(&self, handle: &JobHandle) -> Result<TaskInfo> {
        let req = self
            .http
            .get(handle.as_str())
            .header(CACHE_CONTROL, "no-cache");

        let body = self
            .authorize(req)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(RunError::PollTransport)?
            .bytes()
            .await
            .map_err(RunError::PollTransport)?;

        poll::parse_task_response(&body)
    }
}

impl GateSource for SonarClient {
    async fn fetch_gate(&self, project_key: &str) -> Result<QualityGateResult> {
        let url = format!("{}{GATE_STATUS_PATH}", self.base_url);
        let req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(CACHE_CONTROL, "no-cache")
            .body(gate_request_body(project_key));

        let body = self
            .authorize(req)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(RunError::GateFetch)?
            .bytes()
            .await
            .map_err(RunError::GateFetch)?;

        gate::parse_gate_response(&body)
    }
}

/// Form body of the gate request.
///
/// The key is sent as-is: `:` is a legal form value character and the
/// server expects `projectKey=org:repo:main` verbatim.
pub fn gate_request_body(project_key: &str) -> String {
    format!("projectKey={project_key}")
}
