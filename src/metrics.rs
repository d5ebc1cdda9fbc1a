use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::quota::{DAILY_POINTS, HOURLY_POINTS};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the static quota budgets.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        ensure_metrics_described();
        gauge!("quota_hourly_budget_points").set(f64::from(HOURLY_POINTS));
        gauge!("quota_daily_budget_points").set(f64::from(DAILY_POINTS));

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Poll cycles started.");
        describe_counter!("poll_cycle_errors_total", "Poll cycles aborted by a session or fetch error.");
        describe_counter!("mentions_fetched_total", "Notifications returned by the listing.");
        describe_counter!(
            "mentions_selected_total",
            "Mentions selected for processing, by command."
        );
        describe_counter!(
            "mentions_failed_total",
            "Mentions that ended in an error, by command."
        );
        describe_counter!("posts_created_total", "Replies successfully posted.");
        describe_counter!(
            "posts_rate_limited_total",
            "Post attempts rejected with HTTP 429."
        );
        describe_counter!("quota_denied_total", "Quota checks that refused an action.");
        describe_counter!("analysis_attempts_total", "Analysis API requests sent.");
        describe_counter!(
            "analysis_fallbacks_total",
            "Queries answered with the fallback result after exhausting retries."
        );
        describe_gauge!("quota_hourly_points", "Points spent in the current hour window.");
        describe_gauge!("quota_daily_points", "Points spent in the current day window.");
        describe_gauge!("poll_last_run_ts", "Unix ts when the last poll cycle finished.");
    });
}
