//! Configuration file loading, secret resolution and validation.
//!
//! The file is TOML (`ephemera.toml` by default). Every section except
//! `[[backends]]` is optional and falls back to its defaults. Secrets never
//! appear in the file; it names the environment variables that hold them.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use secrecy::SecretString;
use serde::Deserialize;

use backends::{build_registry, descriptors, BackendConfig, BuildContext, DEFAULT_SERVER_URL};
use dispatch::{
    retry_budget_findings, validate_backend_table, Finding, FindingLevel, RetryOptions,
    RunnerLevel, DEFAULT_JOB_QUEUE_EXPIRY,
};
use github::{GithubAuth, GithubConfig};
use lifecycle::{OrchestratorConfig, RecoveryConfig};
use listener::{HookConfig, IdleQueueConfig, IntakeConfig, ServerConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ephemera.toml";

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub idle_watch: IdleQueueConfig,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub selector_hook: Option<HookConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// `[github]`: API connection, credentials and the webhook secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubSection {
    #[serde(flatten)]
    pub client: GithubConfig,
    /// Web URL workers register against.
    pub server_url: String,
    /// Variable holding the webhook secret.
    pub webhook_secret_env: String,
    pub auth: AuthSection,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            client: GithubConfig::default(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            webhook_secret_env: "EPHEMERA_WEBHOOK_SECRET".to_string(),
            auth: AuthSection::default(),
        }
    }
}

/// `[github.auth]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthSection {
    /// GitHub App; the private key PEM is read from `private_key_env`.
    App {
        app_id: String,
        private_key_env: String,
    },
    /// A fixed token read from `token_env`.
    Token { token_env: String },
}

impl Default for AuthSection {
    fn default() -> Self {
        AuthSection::Token {
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

/// `[orchestrator]`, in whole seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub retry: RetryOptions,
    pub runner_level: RunnerLevel,
    pub cleanup_busy_interval_secs: u64,
    pub cleanup_busy_attempts: u32,
    pub max_idle_secs: u64,
    pub idle_initial_delay_secs: u64,
    pub job_queue_expiry_secs: u64,
    pub max_start_attempts: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            retry: defaults.retry,
            runner_level: defaults.runner_level,
            cleanup_busy_interval_secs: defaults.cleanup_busy_interval.as_secs(),
            cleanup_busy_attempts: defaults.cleanup_busy_attempts,
            max_idle_secs: defaults.max_idle.as_secs(),
            idle_initial_delay_secs: defaults.idle_initial_delay.as_secs(),
            job_queue_expiry_secs: DEFAULT_JOB_QUEUE_EXPIRY.as_secs(),
            max_start_attempts: defaults.max_start_attempts,
        }
    }
}

impl OrchestratorSection {
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry,
            runner_level: self.runner_level,
            cleanup_busy_interval: Duration::from_secs(self.cleanup_busy_interval_secs),
            cleanup_busy_attempts: self.cleanup_busy_attempts,
            max_idle: Duration::from_secs(self.max_idle_secs),
            idle_initial_delay: Duration::from_secs(self.idle_initial_delay_secs),
            job_queue_expiry: self.job_queue_expiry(),
            max_start_attempts: self.max_start_attempts,
        }
    }

    pub fn job_queue_expiry(&self) -> Duration {
        Duration::from_secs(self.job_queue_expiry_secs)
    }
}

/// `[recovery]`. The watcher needs GitHub App credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub enabled: bool,
    #[serde(flatten)]
    pub watcher: RecoveryConfig,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            watcher: RecoveryConfig::default(),
        }
    }
}

/// `[store]`: where execution records live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Lost on restart.
    #[default]
    Memory,
    /// One JSON file per record under `dir`.
    File { dir: String },
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// `[observability]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// OTLP gRPC endpoint; traces are exported only when set.
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            service_name: "ephemera".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Reads and parses `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file '{}'", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("invalid configuration file '{}'", path.display()))
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `true` when delivery recovery is enabled and can run with the
    /// configured credentials.
    pub fn recovery_active(&self) -> bool {
        self.recovery.enabled && matches!(self.github.auth, AuthSection::App { .. })
    }

    /// Every validation finding, errors and warnings, in a stable order.
    ///
    /// `env` resolves the environment variables the file names.
    pub fn findings(&self, env: &impl Fn(&str) -> Option<String>) -> Vec<Finding> {
        let mut findings = Vec::new();

        if self.backends.is_empty() {
            findings.push(Finding::error("at least one [[backends]] entry is required"));
        }
        let table = descriptors(&self.backends);
        findings.extend(validate_backend_table(&table));
        findings.extend(retry_budget_findings(
            &self.orchestrator.retry,
            &table,
            self.orchestrator.job_queue_expiry(),
        ));

        match reqwest::Client::builder().build() {
            Ok(http) => {
                let context = BuildContext {
                    http,
                    server_url: self.github.server_url.clone(),
                };
                if let Err(err) = build_registry(&self.backends, &context, env) {
                    findings.push(Finding::error(err.to_string()));
                }
            }
            Err(err) => findings.push(Finding::error(format!("cannot build HTTP client: {err}"))),
        }

        if self.orchestrator.max_start_attempts == 0 {
            findings.push(Finding::error("orchestrator.max_start_attempts must be at least 1"));
        }
        if self.idle_watch.batch_size == 0 {
            findings.push(Finding::error("idle_watch.batch_size must be at least 1"));
        }
        if let Some(hook) = &self.selector_hook {
            if hook.url.trim().is_empty() {
                findings.push(Finding::error("selector_hook.url must not be empty"));
            }
        }
        if self.recovery.enabled && !self.recovery_active() {
            findings.push(Finding::warning(
                "delivery recovery needs GitHub App credentials and is disabled",
            ));
        }
        if let Err(err) = Secrets::resolve(self, env) {
            findings.push(Finding::error(format!("{err:#}")));
        }

        findings
    }
}

/// Returns `true` if any finding is an error.
pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.level == FindingLevel::Error)
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Secrets read from the environment.
pub struct Secrets {
    pub webhook_secret: SecretString,
    pub auth: GithubAuth,
}

impl Secrets {
    /// Reads every secret the configuration names.
    pub fn resolve(config: &Config, env: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let webhook_secret = required(env, &config.github.webhook_secret_env, "webhook secret")?;
        let auth = match &config.github.auth {
            AuthSection::App {
                app_id,
                private_key_env,
            } => {
                if app_id.trim().is_empty() {
                    bail!("github.auth.app_id must not be empty");
                }
                GithubAuth::App {
                    app_id: app_id.clone(),
                    private_key: required(env, private_key_env, "GitHub App private key")?,
                }
            }
            AuthSection::Token { token_env } => GithubAuth::Token {
                token: required(env, token_env, "GitHub token")?,
            },
        };
        Ok(Self {
            webhook_secret,
            auth,
        })
    }
}

fn required(
    env: &impl Fn(&str) -> Option<String>,
    variable: &str,
    what: &str,
) -> anyhow::Result<SecretString> {
    match env(variable) {
        Some(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => bail!("{what}: environment variable '{variable}' is not set"),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
