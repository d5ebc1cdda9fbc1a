//! Fact-check bot entrypoint.
//! Boots the poll scheduler and the HTTP server, and shuts both down on Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use factcheck_bot::{
    analysis::{PerplexityTransport, QueryClient},
    api::{self, AppState},
    config::BotConfig,
    dispatch::{spawn_poll_scheduler, Dispatcher},
    metrics::Metrics,
    quota::{JsonFileStore, QuotaLedger},
    social::BlueskyClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    factcheck_bot::init_tracing();

    let cfg = BotConfig::load().context("loading configuration")?;
    tracing::info!(
        service = %cfg.bluesky.service,
        model = %cfg.analysis.model,
        poll_secs = cfg.poll_interval_secs,
        quota_file = %cfg.quota_path.display(),
        "starting fact-check bot"
    );

    let metrics = if cfg.metrics_enabled {
        Some(Metrics::init()?)
    } else {
        None
    };

    let social = Arc::new(BlueskyClient::new(
        &cfg.bluesky.service,
        &cfg.bluesky.identifier,
        &cfg.bluesky.password,
        cfg.bluesky.session_path.clone(),
        cfg.bluesky.request_timeout(),
    )?);
    social
        .ensure_auth()
        .await
        .context("initial Bluesky authentication")?;

    let transport = PerplexityTransport::new(
        &cfg.analysis.endpoint,
        &cfg.analysis.api_key,
        cfg.analysis.request_timeout(),
    )?;
    let analyst = QueryClient::new(Arc::new(transport), cfg.analysis.model.clone())
        .with_policy(cfg.analysis.retry_policy());
    let ledger = QuotaLedger::new(JsonFileStore::new(cfg.quota_path.clone()));

    let dispatcher = Dispatcher::new(social, analyst, ledger, cfg.dispatch.clone());
    let state = AppState {
        quota: Some(Arc::new(QuotaLedger::new(JsonFileStore::new(
            cfg.quota_path.clone(),
        )))),
        ..AppState::default()
    };
    let poller = spawn_poll_scheduler(dispatcher, cfg.poll_interval(), state.last_cycle.clone());

    let mut router = api::create_router(state);
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(target: "api", %addr, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("http server")?;

    poller.abort();
    Ok(())
}
