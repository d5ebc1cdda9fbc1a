// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod analysis;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod format;
pub mod metrics;
pub mod quota;
pub mod social;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::config::BotConfig;
pub use crate::dispatch::{CycleReport, Dispatcher};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str =
    "factcheck_bot=info,dispatch=info,quota=info,analysis=info,social=info,api=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}
