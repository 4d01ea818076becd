//! Composition root: builds every component from the configuration and runs
//! the intake server with its background loops.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use backends::{build_registry, descriptors, BuildContext};
use dispatch::{BackendTable, ExecutionStore, Finding, FindingLevel};
use github::GithubClient;
use lifecycle::{
    Clock, DeliveryRecoveryWatcher, ExecutionHost, FileExecutionStore, IdleWatcher,
    MemoryExecutionStore, Orchestrator, SystemClock,
};
use listener::{
    router, serve, AppState, DelayQueue, HttpSelectorHook, IdleWatchConsumer, Intake,
};

use crate::config::{has_errors, Config, Secrets, StoreConfig};

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Logs every finding at its level.
pub fn log_findings(findings: &[Finding]) {
    for finding in findings {
        match finding.level {
            FindingLevel::Error => error!(finding = %finding.message, "Configuration error"),
            FindingLevel::Warning => warn!(finding = %finding.message, "Configuration warning"),
        }
    }
}

/// Validates `config` and returns the findings; the process environment
/// supplies secrets.
pub fn validate(config: &Config) -> Vec<Finding> {
    config.findings(&env)
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn ExecutionStore>> {
    Ok(match config {
        StoreConfig::Memory => {
            warn!("Execution records are kept in memory and are lost on restart");
            Arc::new(MemoryExecutionStore::new())
        }
        StoreConfig::File { dir } => Arc::new(
            FileExecutionStore::open(dir)
                .await
                .with_context(|| format!("cannot open execution store '{dir}'"))?,
        ),
    })
}

/// Runs the service until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let findings = validate(&config);
    log_findings(&findings);
    if has_errors(&findings) {
        bail!("configuration has errors; refusing to start");
    }

    let secrets = Secrets::resolve(&config, &env)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table = Arc::new(BackendTable::new(descriptors(&config.backends))?);
    let github = Arc::new(GithubClient::new(
        config.github.client.clone(),
        secrets.auth,
    )?);
    let http = reqwest::Client::builder()
        .build()
        .context("cannot build HTTP client")?;
    let context = BuildContext {
        http: http.clone(),
        server_url: config.github.server_url.clone(),
    };
    let registry = build_registry(&config.backends, &context, env)?;
    let store = open_store(&config.store).await?;
    let queue = Arc::new(DelayQueue::new());

    let orchestrator_config = config.orchestrator.to_config();
    let runner_level = orchestrator_config.runner_level;
    let orchestrator = Arc::new(Orchestrator::new(
        orchestrator_config,
        &table,
        store.clone(),
        github.clone(),
        registry,
        queue.clone(),
        clock.clone(),
    ));
    let host = Arc::new(ExecutionHost::new(orchestrator, clock.clone()));
    host.resume_all().await?;

    let mut intake = Intake::new(
        secrets.webhook_secret,
        config.intake.clone(),
        table,
        github.clone(),
        host,
    );
    if let Some(hook) = &config.selector_hook {
        info!(url = %hook.url, "Selector hook enabled");
        intake = intake.with_hook(Arc::new(HttpSelectorHook::new(http, hook)));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let watcher = IdleWatcher::new(store, github.clone(), runner_level, clock.clone());
    let consumer = IdleWatchConsumer::new(queue.clone(), Arc::new(watcher), config.idle_watch);
    tasks.push(tokio::spawn(consumer.run(shutdown_rx.clone())));

    if config.recovery_active() {
        let recovery = Arc::new(DeliveryRecoveryWatcher::new(
            github,
            config.recovery.watcher,
            clock.clone(),
        ));
        tasks.push(tokio::spawn(recovery.run(shutdown_rx)));
    } else {
        info!("Delivery recovery disabled");
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("cannot bind '{}'", config.server.bind))?;
    let app = router(AppState::new(
        Arc::new(intake),
        clock,
        config.server.status_limit,
    ));
    serve(listener, app, shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    queue.close().await;
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "Background task ended abnormally");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown requested");
}
