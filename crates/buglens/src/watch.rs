use anyhow::Context;
use buglens_engine::clock::{Clock, SystemClock};
use buglens_engine::config::BuglensConfig;
use buglens_engine::engine::{CaptureEngine, EngineHandle};
use buglens_engine::formatter::format_entry;
use buglens_engine::sink::{KvReportSink, TriageDispatcher};
use buglens_engine::store::{KvStore, PersistentLogStore};
use buglens_engine::triage::{GeminiClient, GenerationClient, PageContextSource, TriagePipeline};
use buglens_h::cdp::target_id;
use buglens_h::{BrowserHost, ChromeBackend, install_prebuffer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Opens `url`, attaches the capture engine and runs until Ctrl+C.
pub async fn run(
    mut config: BuglensConfig,
    kv: Arc<dyn KvStore>,
    url: &str,
    visible: bool,
) -> anyhow::Result<()> {
    let url = parse_url(url)?;

    let client: Arc<dyn GenerationClient> = match GeminiClient::from_config(&config.triage)? {
        Some(client) => Arc::new(client),
        None => {
            warn!(
                "{} is not set; errors will get basic reports only",
                config.triage.api_key_env
            );
            config.triage.enabled = false;
            Arc::new(GeminiClient::new(
                config.triage.endpoint.clone(),
                "",
                Duration::from_secs(config.triage.request_timeout_secs),
            )?)
        }
    };

    let host = BrowserHost::launch(visible).await?;
    let backend = Arc::new(ChromeBackend::new(host));
    let persistent = PersistentLogStore::from_config(&config.persistence).shared();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let context = Arc::new(PageContextSource::new(
        backend.clone(),
        persistent.clone(),
        config.triage.context_entries,
    ));
    let pipeline = TriagePipeline::load(&config, kv.clone(), client, context, clock.clone())
        .await
        .context("failed to load triage state")?;
    let sink = Arc::new(KvReportSink::new(kv.clone()));
    let dispatcher = Arc::new(TriageDispatcher::new(Arc::new(pipeline), sink));

    let engine = CaptureEngine::new(&config, backend.clone(), persistent, kv, dispatcher, clock);
    let (handle, commands) = EngineHandle::channel(16);
    let engine_task = tokio::spawn(engine.run(commands));

    let result = watch_page(&backend, &handle, &config, &url).await;

    handle.shutdown().await;
    if let Err(e) = engine_task.await {
        warn!("Capture engine task failed: {}", e);
    }
    backend.close().await?;
    result
}

async fn watch_page(
    backend: &ChromeBackend,
    handle: &EngineHandle,
    config: &BuglensConfig,
    url: &Url,
) -> anyhow::Result<()> {
    let page = backend.open_page("about:blank").await?;
    if config.capture.merge_pre_attach {
        if let Err(e) = install_prebuffer(&page).await {
            warn!("Console history before attach will be missing: {}", e);
        }
    }
    page.goto(url.as_str())
        .await
        .with_context(|| format!("failed to open {}", url))?;

    let target = target_id(&page);
    handle.attach(&target).await?;
    info!("Watching {} (target {}); press Ctrl+C to stop", url, target);

    tokio::signal::ctrl_c().await?;
    info!("Stopping capture");

    if let Some(snapshot) = handle.snapshot(&target).await {
        println!(
            "Captured {} log entries, {} network entries, {} errors",
            snapshot.logs.len(),
            snapshot.network_requests.len(),
            snapshot.errors.len()
        );
        for entry in &snapshot.errors {
            println!("{}", format_entry(entry));
        }
    }
    Ok(())
}

/// Accepts bare hosts by assuming https.
fn parse_url(input: &str) -> anyhow::Result<Url> {
    let trimmed = input.trim();
    Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{}", trimmed)))
        .with_context(|| format!("invalid URL: {}", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(parse_url("example.com/cart").unwrap().as_str(), "https://example.com/cart");
        assert_eq!(parse_url("http://localhost:3000").unwrap().as_str(), "http://localhost:3000/");
        assert!(parse_url("exa mple").is_err());
    }
}
