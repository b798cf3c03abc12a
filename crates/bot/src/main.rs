mod console;

use std::sync::Arc;

use chatwatch_common::config::AppConfig;
use chatwatch_engine::{MergeRequestWatcher, SiteChecker, Worker};
use chatwatch_fetcher::{GitLabClient, HttpProbe};
use chatwatch_notifier::{ChatHost, Notifier, WebhookChatHost};

use crate::console::ConsoleChatHost;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatwatch=info,chatwatch_engine=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Chatwatch starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let host: Arc<dyn ChatHost> = match &config.webhook_url {
        Some(url) => {
            tracing::info!(webhook = %url, "Delivering through webhook");
            Arc::new(WebhookChatHost::new(url.as_str(), config.http_timeout)?)
        }
        None => {
            tracing::info!("No CHATWATCH_WEBHOOK_URL set, delivering to the console");
            Arc::new(ConsoleChatHost)
        }
    };
    let notifier = Notifier::new(host);

    let workers = build_workers(&config, &notifier).await?;
    if workers.is_empty() {
        tracing::warn!("No engine configured; set MRWATCH_GITLAB_URL and/or SITECHECK_SITES");
    }
    for worker in &workers {
        worker.start();
    }

    tokio::select! {
        result = console::read_commands(workers, notifier) => {
            result?;
            // Input closed; keep the background loops alive until Ctrl+C.
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    tracing::info!("Chatwatch stopped.");
    Ok(())
}

/// Construct every configured worker. Any configuration problem aborts
/// startup.
async fn build_workers(
    config: &AppConfig,
    notifier: &Notifier,
) -> anyhow::Result<Vec<Arc<dyn Worker>>> {
    let mut workers: Vec<Arc<dyn Worker>> = Vec::new();

    if let Some(mr_config) = &config.merge_requests {
        let client = GitLabClient::new(
            &mr_config.gitlab_url,
            &mr_config.token,
            mr_config.projects.clone(),
            config.http_timeout,
        )?;
        for (project, e) in client.check_projects().await {
            tracing::warn!(project = %project, error = %e, "GitLab project not reachable");
        }
        let watcher = MergeRequestWatcher::new(
            mr_config,
            config.max_in_flight,
            Arc::new(client),
            notifier.clone(),
        )?;
        workers.push(Arc::new(watcher));
    }

    if let Some(site_config) = &config.sites {
        let probe = HttpProbe::new(config.http_timeout)?;
        let checker = SiteChecker::new(
            site_config,
            config.max_in_flight,
            config.http_timeout,
            Arc::new(probe),
            notifier.clone(),
        )?;
        workers.push(Arc::new(checker));
    }

    Ok(workers)
}
