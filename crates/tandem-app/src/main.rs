mod http;

use std::sync::Arc;

use anyhow::{Context, Result};
use tandem_core::{GitlabAdapter, MappingStore, RedmineAdapter};
use tandem_engine::{PollConfig, PollDriver, SyncDeps};
use tandem_gitlab::{GitlabClient, GitlabConfig};
use tandem_redmine::{RedmineClient, RedmineConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = tandem_config::load_from_env().context("loading configuration")?;

    let store = MappingStore::open(&config.storage.connection_string)
        .context("opening mapping store and applying migrations")?;

    let mut redmine_config =
        RedmineConfig::new(config.redmine.base_url.clone(), config.redmine.api_key.clone());
    if let Some(public_url) = &config.redmine.public_url {
        redmine_config = redmine_config.with_public_url(public_url.clone());
    }
    let redmine =
        Arc::new(RedmineClient::new(redmine_config).context("building Redmine client")?);

    let mut gitlab_config = GitlabConfig::new(
        config.gitlab.base_url.clone(),
        config.gitlab.token.clone(),
        config.sync.category_keys.clone(),
    );
    if let Some(public_url) = &config.gitlab.public_url {
        gitlab_config = gitlab_config.with_public_url(public_url.clone());
    }
    let gitlab = Arc::new(GitlabClient::new(gitlab_config).context("building GitLab client")?);

    let cancel = CancellationToken::new();

    // Reachability check before the first pass; failures here are
    // configuration problems, not transient weather.
    redmine
        .health_check(&cancel)
        .await
        .context("Redmine is unreachable or the API key is invalid")?;
    gitlab
        .health_check(&cancel)
        .await
        .context("GitLab is unreachable or the token is invalid")?;

    let deps = Arc::new(SyncDeps::new(
        redmine as Arc<dyn RedmineAdapter>,
        gitlab as Arc<dyn GitlabAdapter>,
        store,
        config.redmine.custom_field_name.clone(),
        config.sync.category_keys.clone(),
    ));

    let driver = Arc::new(PollDriver::new(
        Arc::clone(&deps),
        PollConfig {
            interval: std::time::Duration::from_secs(config.polling.interval_seconds),
            jitter: std::time::Duration::from_secs(config.polling.jitter_seconds),
        },
    ));

    if let Some(bind_address) = &config.health.bind_address {
        let listener = tokio::net::TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("binding status endpoint to {bind_address}"))?;
        let router = http::router(driver.status_handle());
        info!(address = %bind_address, "status endpoint listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                warn!(error = %err, "status endpoint terminated");
            }
        });
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    if config.polling.enabled {
        driver.run(cancel).await;
    } else {
        info!("polling disabled; running a single pass");
        driver.run_once(&cancel).await;
    }

    Ok(())
}
