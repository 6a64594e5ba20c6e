use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use inbox_digest::config::Config;
use inbox_digest::dispatch::Dispatcher;
use inbox_digest::fetch;
use inbox_digest::llm::{LlmClient, Summarizer};
use inbox_digest::sinks::{EmailReplySink, SummarySink, WebhookSink};

/// Capacity of the fetch → dispatch channel. Small on purpose: the
/// fetcher caps each cycle at three messages anyway.
const CHANNEL_CAPACITY: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config =
        Config::load(&config_path).with_context(|| format!("loading config from {config_path}"))?;

    info!(
        server = %config.email.imap_server,
        mailbox = %config.email.mailbox,
        model = %config.llm.model,
        "inbox-digest starting"
    );

    // One HTTP client for the backend and the webhook, fixed 30s timeout.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;

    let summarizer: Arc<dyn Summarizer> = Arc::new(LlmClient::new(http.clone(), &config.llm));
    let sinks: Vec<Arc<dyn SummarySink>> = vec![
        Arc::new(WebhookSink::new(http, config.webhook.url.clone())),
        Arc::new(EmailReplySink::new(config.email.clone())),
    ];
    let dispatcher = Dispatcher::new(summarizer, sinks, config.llm.prompt.clone());

    let (tx, rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let shutdown = Arc::new(AtomicBool::new(false));

    let dispatch_handle = tokio::spawn(dispatcher.run(rx));
    let fetch_handle = fetch::spawn_fetcher(config.email.clone(), tx, Arc::clone(&shutdown));

    wait_for_shutdown().await;
    info!("shutting down");
    shutdown.store(true, Ordering::Relaxed);

    // The fetcher drops its sender on exit; the dispatcher then drains
    // whatever is still in flight and stops.
    fetch_handle.await.context("joining mailbox watcher")?;
    dispatch_handle.await.context("joining dispatcher")?;

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
