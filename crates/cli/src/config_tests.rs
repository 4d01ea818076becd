use std::io::Write;

use super::*;

const MINIMAL: &str = r#"
[[backends]]
id = "linux-pool"
labels = ["linux"]
kind = "command"
program = "/usr/local/bin/start-runner"
"#;

fn env_with(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

fn default_env() -> impl Fn(&str) -> Option<String> {
    env_with(&[("EPHEMERA_WEBHOOK_SECRET", "s3cret"), ("GITHUB_TOKEN", "ghp_x")])
}

fn errors(findings: &[Finding]) -> Vec<&str> {
    findings
        .iter()
        .filter(|f| f.level == FindingLevel::Error)
        .map(|f| f.message.as_str())
        .collect()
}

fn warnings(findings: &[Finding]) -> Vec<&str> {
    findings
        .iter()
        .filter(|f| f.level == FindingLevel::Warning)
        .map(|f| f.message.as_str())
        .collect()
}

#[test]
fn minimal_file_uses_defaults() {
    let config = Config::parse(MINIMAL).unwrap();
    assert_eq!(config.server.bind, "0.0.0.0:8080");
    assert_eq!(config.github.client.api_base, github::DEFAULT_API_BASE);
    assert_eq!(config.github.server_url, "https://github.com");
    assert_eq!(
        config.github.auth,
        AuthSection::Token {
            token_env: "GITHUB_TOKEN".to_string()
        }
    );
    assert_eq!(config.store, StoreConfig::Memory);
    assert_eq!(config.observability.log_format, LogFormat::Pretty);
    assert!(config.selector_hook.is_none());
    assert_eq!(config.backends.len(), 1);

    let orchestrator = config.orchestrator.to_config();
    assert_eq!(orchestrator.max_start_attempts, 100);
    assert_eq!(orchestrator.max_idle, Duration::from_secs(300));
    assert_eq!(orchestrator.retry, RetryOptions::default());
}

#[test]
fn full_file_is_read() {
    let config = Config::parse(
        r#"
        [server]
        bind = "127.0.0.1:9000"
        status_limit = 10

        [github]
        api_base = "https://ghe.example.com/api/v3"
        server_url = "https://ghe.example.com"
        webhook_secret_env = "HOOK_SECRET"

        [github.auth]
        mode = "app"
        app_id = "1234"
        private_key_env = "APP_KEY"

        [intake]
        require_label = "ephemeral"

        [orchestrator]
        runner_level = "organization"
        max_idle_secs = 600
        max_start_attempts = 5

        [orchestrator.retry]
        interval_secs = 30
        backoff_rate = 2.0
        max_attempts = 5

        [idle_watch]
        batch_size = 4

        [recovery]
        interval_secs = 120
        freshness_secs = 3600

        [selector_hook]
        url = "http://127.0.0.1:7000/select"

        [store]
        kind = "file"
        dir = "/var/lib/ephemera"

        [observability]
        log_format = "json"
        otlp_endpoint = "http://collector:4317"

        [[backends]]
        id = "launcher"
        labels = ["linux", "gpu"]
        kind = "http"
        url = "http://launcher.internal/start"
        "#,
    )
    .unwrap();

    assert_eq!(config.server.status_limit, 10);
    assert_eq!(config.github.client.api_base, "https://ghe.example.com/api/v3");
    assert_eq!(
        config.github.auth,
        AuthSection::App {
            app_id: "1234".to_string(),
            private_key_env: "APP_KEY".to_string()
        }
    );
    assert_eq!(config.intake.require_label.as_deref(), Some("ephemeral"));

    let orchestrator = config.orchestrator.to_config();
    assert_eq!(orchestrator.runner_level, RunnerLevel::Organization);
    assert_eq!(orchestrator.max_idle, Duration::from_secs(600));
    assert_eq!(orchestrator.max_start_attempts, 5);
    assert_eq!(orchestrator.retry.interval_secs, 30);
    assert_eq!(
        orchestrator.cleanup_busy_interval,
        Duration::from_secs(60),
        "unset keys keep their defaults"
    );

    assert_eq!(config.idle_watch.batch_size, 4);
    assert_eq!(config.recovery.watcher.interval_secs, 120);
    assert_eq!(config.recovery.watcher.lookback_secs, 60 * 60);
    assert!(config.recovery_active());
    assert_eq!(config.selector_hook.as_ref().unwrap().timeout_secs, 10);
    assert_eq!(
        config.store,
        StoreConfig::File {
            dir: "/var/lib/ephemera".to_string()
        }
    );
    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert_eq!(
        config.observability.otlp_endpoint.as_deref(),
        Some("http://collector:4317")
    );
}

#[test]
fn unknown_sections_are_rejected() {
    let text = format!("{MINIMAL}\n[metrics]\nport = 9090\n");
    assert!(Config::parse(&text).is_err());
}

#[test]
fn load_reads_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.backends[0].id.as_str(), "linux-pool");

    let err = Config::load(&file.path().with_extension("missing")).unwrap_err();
    assert!(format!("{err:#}").contains("cannot read configuration file"));
}

#[test]
fn valid_configuration_has_no_errors() {
    let config = Config::parse(MINIMAL).unwrap();
    let findings = config.findings(&default_env());
    assert!(errors(&findings).is_empty(), "{findings:?}");
    assert!(!has_errors(&findings));
    // Token auth cannot read the delivery log.
    assert_eq!(warnings(&findings).len(), 1);
    assert!(!config.recovery_active());
}

#[test]
fn disabled_recovery_is_not_reported() {
    let text = format!("[recovery]\nenabled = false\n{MINIMAL}");
    let config = Config::parse(&text).unwrap();
    assert!(config.findings(&default_env()).is_empty());
}

#[test]
fn missing_secrets_are_errors() {
    let config = Config::parse(MINIMAL).unwrap();
    let findings = config.findings(&env_with(&[("GITHUB_TOKEN", "ghp_x")]));
    let errors = errors(&findings);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("EPHEMERA_WEBHOOK_SECRET"));

    let findings = config.findings(&env_with(&[("EPHEMERA_WEBHOOK_SECRET", "s3cret")]));
    assert!(errors_mention(&findings, "GITHUB_TOKEN"));
}

fn errors_mention(findings: &[Finding], needle: &str) -> bool {
    errors(findings).iter().any(|e| e.contains(needle))
}

#[test]
fn app_auth_reads_the_private_key() {
    let text = format!(
        "[github.auth]\nmode = \"app\"\napp_id = \"1\"\nprivate_key_env = \"APP_KEY\"\n{MINIMAL}"
    );
    let config = Config::parse(&text).unwrap();
    let secrets = Secrets::resolve(
        &config,
        &env_with(&[("EPHEMERA_WEBHOOK_SECRET", "s"), ("APP_KEY", "-----BEGIN")]),
    )
    .unwrap();
    assert!(matches!(secrets.auth, GithubAuth::App { ref app_id, .. } if app_id == "1"));

    let missing = Secrets::resolve(&config, &env_with(&[("EPHEMERA_WEBHOOK_SECRET", "s")]));
    assert!(missing.is_err());
}

#[test]
fn empty_backend_list_is_an_error() {
    let config = Config::parse("").unwrap();
    let findings = config.findings(&default_env());
    assert!(errors_mention(&findings, "[[backends]]"));
}

#[test]
fn overlapping_backends_are_reported() {
    let text = format!(
        "{MINIMAL}\n[[backends]]\nid = \"twin\"\nlabels = [\"Linux\"]\nkind = \"command\"\nprogram = \"x\"\n"
    );
    let config = Config::parse(&text).unwrap();
    let findings = config.findings(&default_env());
    assert!(errors_mention(&findings, "twin"));
}

#[test]
fn unresolved_composite_member_is_an_error() {
    let text = format!(
        "{MINIMAL}\n[[backends]]\nid = \"pool\"\nlabels = [\"arm\"]\nkind = \"fallback\"\nmembers = [\"nowhere\"]\n"
    );
    let config = Config::parse(&text).unwrap();
    let findings = config.findings(&default_env());
    assert!(errors_mention(&findings, "nowhere"));
}

#[test]
fn long_retry_envelope_is_a_warning() {
    let text = format!(
        "[orchestrator.retry]\ninterval_secs = 60\nbackoff_rate = 1.3\nmax_attempts = 30\n{MINIMAL}"
    );
    let config = Config::parse(&text).unwrap();
    let findings = config.findings(&default_env());
    assert!(errors(&findings).is_empty());
    assert!(warnings(&findings)
        .iter()
        .any(|w| w.contains("global retry options")));
}

#[test]
fn zero_start_attempts_is_an_error() {
    let text = format!("[orchestrator]\nmax_start_attempts = 0\n{MINIMAL}");
    let config = Config::parse(&text).unwrap();
    assert!(errors_mention(
        &config.findings(&default_env()),
        "max_start_attempts"
    ));
}
