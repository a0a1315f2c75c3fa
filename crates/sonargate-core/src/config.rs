use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, RunError};

pub const DEFAULT_TEMPLATE_PATH: &str = "/opt/sonar-scanner/conf/sonar-scanner.properties.tmpl";
pub const DEFAULT_PROPERTIES_PATH: &str = "/opt/sonar-scanner/conf/sonar-scanner.properties";
pub const DEFAULT_SCANNER: &str = "sonar-scanner";
pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_QUALITY: &str = "OK";

/// Timing knobs for the job poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Hard upper bound on the whole wait.
    pub timeout: Duration,
    /// Delay between two status requests.
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(500),
        }
    }
}

impl PollSettings {
    /// Upper bound on the number of ticks a poll can take.
    pub fn max_ticks(&self) -> u32 {
        if self.interval.is_zero() {
            return 0;
        }
        (self.timeout.as_nanos() / self.interval.as_nanos()) as u32
    }
}

/// External scanner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ScannerCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_SCANNER.to_string(),
            args: vec![],
        }
    }
}

/// Parameters of a single run.
///
/// Built once before the run starts and passed by reference to every stage.
/// Nothing mutates it afterwards; derived values such as the normalized
/// project key are computed on demand.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub host: String,
    pub token: Option<String>,
    /// Raw project key, e.g. `org/repo`.
    pub key: String,
    pub name: String,
    pub version: Option<String>,
    pub sources: String,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub inclusions: Option<String>,
    pub exclusions: Option<String>,
    pub language: Option<String>,
    pub profile: Option<String>,
    pub encoding: String,
    /// Expected quality gate status.
    pub quality: String,

    pub template_path: PathBuf,
    pub properties_path: PathBuf,
    pub scanner: ScannerCommand,
    pub poll: PollSettings,
    /// Per-request network timeout, distinct from the poll deadline.
    pub request_timeout: Duration,
}

impl RunConfig {
    /// Config with defaults for everything but the server and the project.
    pub fn new(host: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            host: host.into(),
            token: None,
            name: key.clone(),
            key,
            version: None,
            sources: ".".to_string(),
            branch: None,
            remote: None,
            inclusions: None,
            exclusions: None,
            language: None,
            profile: None,
            encoding: DEFAULT_ENCODING.to_string(),
            quality: DEFAULT_QUALITY.to_string(),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            properties_path: PathBuf::from(DEFAULT_PROPERTIES_PATH),
            scanner: ScannerCommand::default(),
            poll: PollSettings::default(),
            request_timeout: Duration::from_secs(3),
        }
    }

    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RunError::InvalidConfig("host is required".into()));
        }
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(RunError::InvalidConfig(format!(
                "host must be an http(s) url, got {}",
                self.host
            )));
        }
        if self.key.trim().is_empty() {
            return Err(RunError::InvalidConfig("project key is required".into()));
        }
        if self.poll.interval.is_zero() {
            return Err(RunError::InvalidConfig("poll interval must be > 0".into()));
        }
        if self.poll.interval > self.poll.timeout {
            return Err(RunError::InvalidConfig(format!(
                "poll interval {:?} exceeds poll timeout {:?}",
                self.poll.interval, self.poll.timeout
            )));
        }
        Ok(())
    }

    /// Host URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    /// Project key with path separators turned into namespace separators.
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.key)
    }

    /// Key the quality gate is queried with: normalized key plus `:<branch>`.
    pub fn project_key(&self) -> String {
        with_branch(&self.normalized_key(), self.branch.as_deref())
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            host: self.base_url().to_string(),
            project_key: self.project_key(),
            expected_quality: self.quality.clone(),
            has_token: self.token.is_some(),
        }
    }
}

/// Token-free view of the config for logs and reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigSummary {
    pub host: String,
    pub project_key: String,
    pub expected_quality: String,
    pub has_token: bool,
}

/// Replace every `/` with `:`. Idempotent.
pub fn normalize_key(raw: &str) -> String {
    raw.replace('/', ":")
}

/// Append `:<branch>` when a non-empty branch is set.
pub fn with_branch(key: &str, branch: Option<&str>) -> String {
    match branch.map(str::trim) {
        Some(b) if !b.is_empty() => format!("{key}:{b}"),
        _ => key.to_string(),
    }
}
