use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use sonargate_core::config::{
    DEFAULT_ENCODING, DEFAULT_PROPERTIES_PATH, DEFAULT_QUALITY, DEFAULT_SCANNER,
    DEFAULT_TEMPLATE_PATH, PollSettings, RunConfig, ScannerCommand,
};

/// Every flag falls back to a `PLUGIN_*` variable and then to the CI aliases
/// named in its help. Host, token and quality gate read `SONAR_*` first and
/// `PLUGIN_*` second.
#[derive(Debug, Parser)]
#[command(
    name = "sonargate",
    version,
    about = "Run a SonarQube scan and gate the pipeline on its quality gate"
)]
pub struct Args {
    /// Sonar host URL [env: SONAR_HOST, PLUGIN_HOST]
    #[arg(long)]
    pub host: Option<String>,

    /// Sonar token [env: SONAR_TOKEN, PLUGIN_TOKEN]
    #[arg(long)]
    pub token: Option<String>,

    /// Project key, `/` is turned into `:` [aliases: DRONE_REPO]
    #[arg(long, env = "PLUGIN_KEY")]
    pub key: Option<String>,

    /// Project name, defaults to the key [aliases: DRONE_REPO]
    #[arg(long, env = "PLUGIN_NAME")]
    pub name: Option<String>,

    /// Branch appended to the quality gate key [aliases: DRONE_REPO_BRANCH]
    #[arg(long, env = "PLUGIN_BRANCH")]
    pub branch: Option<String>,

    /// Git remote url [aliases: DRONE_REMOTE_URL]
    #[arg(long, env = "PLUGIN_REMOTE")]
    pub remote: Option<String>,

    /// Sources path [aliases: DRONE_WORKSPACE]
    #[arg(long, env = "PLUGIN_PATH")]
    pub path: Option<String>,

    /// Project version [aliases: DRONE_BUILD_NUMBER]
    #[arg(long, env = "PLUGIN_BUILD_NUMBER")]
    pub buildnum: Option<String>,

    /// Source inclusion patterns
    #[arg(long, env = "PLUGIN_INCLUSIONS")]
    pub inclusions: Option<String>,

    /// Source exclusion patterns
    #[arg(long, env = "PLUGIN_EXCLUSIONS")]
    pub exclusions: Option<String>,

    #[arg(long, env = "PLUGIN_LANGUAGE")]
    pub language: Option<String>,

    /// Quality profile
    #[arg(long, env = "PLUGIN_PROFILE")]
    pub profile: Option<String>,

    /// Source encoding
    #[arg(long, env = "PLUGIN_ENCODING", default_value = DEFAULT_ENCODING)]
    pub encoding: String,

    /// Expected quality gate status [env: SONAR_QUALITYGATE, PLUGIN_QUALITYGATE]
    #[arg(long)]
    pub quality: Option<String>,

    /// Scanner properties template
    #[arg(long, env = "PLUGIN_TEMPLATE", default_value = DEFAULT_TEMPLATE_PATH)]
    pub template: PathBuf,

    /// Where the rendered scanner properties are written
    #[arg(long, env = "PLUGIN_PROPERTIES", default_value = DEFAULT_PROPERTIES_PATH)]
    pub properties: PathBuf,

    /// Scanner executable
    #[arg(long, env = "PLUGIN_SCANNER", default_value = DEFAULT_SCANNER)]
    pub scanner: String,

    /// Extra scanner argument, repeatable
    #[arg(long = "scanner-arg", allow_hyphen_values = true)]
    pub scanner_args: Vec<String>,

    #[arg(long, env = "PLUGIN_POLL_TIMEOUT_MS", default_value_t = 5000)]
    pub poll_timeout_ms: u64,

    #[arg(long, env = "PLUGIN_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Timeout of a single HTTP request
    #[arg(long, env = "PLUGIN_REQUEST_TIMEOUT_MS", default_value_t = 3000)]
    pub request_timeout_ms: u64,

    /// Report format
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

/// First non-empty value among `value` and the named variables.
fn or_env(value: Option<String>, aliases: &[&str]) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).or_else(|| {
        aliases
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|v| !v.trim().is_empty())
    })
}

impl Args {
    /// Build the run config. Missing required values are left empty and
    /// rejected by `RunConfig::validate` so they surface in the report.
    pub fn to_config(&self) -> RunConfig {
        let host = or_env(self.host.clone(), &["SONAR_HOST", "PLUGIN_HOST"]).unwrap_or_default();
        let key = or_env(self.key.clone(), &["DRONE_REPO"]).unwrap_or_default();

        let mut config = RunConfig::new(host, key.clone());
        config.token = or_env(self.token.clone(), &["SONAR_TOKEN", "PLUGIN_TOKEN"]);
        config.name = or_env(self.name.clone(), &["DRONE_REPO"]).unwrap_or(key);
        config.branch = or_env(self.branch.clone(), &["DRONE_REPO_BRANCH"]);
        config.remote = or_env(self.remote.clone(), &["DRONE_REMOTE_URL"]);
        if let Some(path) = or_env(self.path.clone(), &["DRONE_WORKSPACE"]) {
            config.sources = path;
        }
        config.version = or_env(self.buildnum.clone(), &["DRONE_BUILD_NUMBER"]);
        config.inclusions = or_env(self.inclusions.clone(), &[]);
        config.exclusions = or_env(self.exclusions.clone(), &[]);
        config.language = or_env(self.language.clone(), &[]);
        config.profile = or_env(self.profile.clone(), &[]);
        config.encoding = self.encoding.clone();
        config.quality = or_env(self.quality.clone(), &["SONAR_QUALITYGATE", "PLUGIN_QUALITYGATE"])
            .unwrap_or_else(|| DEFAULT_QUALITY.to_string());

        config.template_path = self.template.clone();
        config.properties_path = self.properties.clone();
        config.scanner = ScannerCommand {
            program: self.scanner.clone(),
            args: self.scanner_args.clone(),
        };
        config.poll = PollSettings {
            timeout: Duration::from_millis(self.poll_timeout_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
        };
        config.request_timeout = Duration::from_millis(self.request_timeout_ms);
        config
    }
}
