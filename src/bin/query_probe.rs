//! Run one analysis query and print the posts the bot would reply with.
//!
//! Usage: `query-probe [--info] <text...>`

use std::sync::Arc;

use anyhow::{bail, Context};
use factcheck_bot::{
    analysis::{PerplexityTransport, QueryClient, QueryMode},
    config::BotConfig,
    format::{grapheme_len, render_thread},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    factcheck_bot::init_tracing();

    let mut mode = QueryMode::FactCheck;
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--info" => mode = QueryMode::MoreInfo,
            _ => words.push(arg),
        }
    }
    let text = words.join(" ");
    if text.trim().is_empty() {
        bail!("usage: query-probe [--info] <text...>");
    }

    let mut cfg = BotConfig::load_file()?;
    cfg.apply_env()?;
    if cfg.analysis.api_key.trim().is_empty() {
        bail!("Missing PERPLEXITY_API_KEY");
    }

    let transport = PerplexityTransport::new(
        &cfg.analysis.endpoint,
        &cfg.analysis.api_key,
        cfg.analysis.request_timeout(),
    )
    .context("building analysis transport")?;
    let client = QueryClient::new(Arc::new(transport), cfg.analysis.model.clone())
        .with_policy(cfg.analysis.retry_policy());

    let result = client.query(&text, mode).await;
    for (i, post) in render_thread(&result).iter().enumerate() {
        println!("--- post {} ({} chars) ---", i + 1, grapheme_len(post));
        println!("{post}");
    }
    Ok(())
}
