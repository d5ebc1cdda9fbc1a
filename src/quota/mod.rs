//! # Quota Ledger
//! Points-based write budget mirrored from the social network's own limits.
//!
//! Two rolling counters (hourly, daily) are kept in a persisted [`QuotaState`].
//! Windows reset lazily: nothing ticks in the background, the reset happens on
//! the next read that finds the boundary crossed.
//!
//! The ledger assumes a single writer (this process). Read-modify-write through
//! the [`QuotaStore`] is not transactional.

pub mod store;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

pub use store::{JsonFileStore, MemoryStore, QuotaStore};

pub const HOURLY_POINTS: u32 = 5_000;
pub const DAILY_POINTS: u32 = 35_000;

const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;

/// Write actions the platform charges points for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub const fn cost(self) -> u32 {
        match self {
            ActionKind::Create => 3,
            ActionKind::Update => 2,
            ActionKind::Delete => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "CREATE",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
        }
    }
}

/// Persisted counters. Serialized as `{hourlyPoints, dailyPoints, lastHourReset, lastDayReset}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub hourly_points: u32,
    pub daily_points: u32,
    pub last_hour_reset: DateTime<Utc>,
    pub last_day_reset: DateTime<Utc>,
}

impl QuotaState {
    /// Empty counters with both windows starting at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            hourly_points: 0,
            daily_points: 0,
            last_hour_reset: now,
            last_day_reset: now,
        }
    }

    /// Zero any window whose boundary has been crossed. Returns true if anything changed.
    pub fn roll_windows(&mut self, now: DateTime<Utc>) -> bool {
        let mut updated = false;
        if now.signed_duration_since(self.last_hour_reset) > Duration::seconds(HOUR_SECS) {
            self.hourly_points = 0;
            self.last_hour_reset = now;
            updated = true;
        }
        if now.signed_duration_since(self.last_day_reset) > Duration::seconds(DAY_SECS) {
            self.daily_points = 0;
            self.last_day_reset = now;
            updated = true;
        }
        updated
    }

    /// Budget check; the boundary `current + cost == budget` is allowed.
    pub fn allows(&self, action: ActionKind) -> bool {
        let cost = action.cost();
        self.hourly_points.saturating_add(cost) <= HOURLY_POINTS
            && self.daily_points.saturating_add(cost) <= DAILY_POINTS
    }
}

/// Explicit ledger object handed to the dispatcher, backed by an injected store.
pub struct QuotaLedger {
    store: Box<dyn QuotaStore>,
}

impl QuotaLedger {
    pub fn new(store: impl QuotaStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub async fn check_and_reset_counters(&self) -> anyhow::Result<QuotaState> {
        self.check_and_reset_counters_at(Utc::now()).await
    }

    /// Load state, roll expired windows, persist only if a reset fired.
    pub async fn check_and_reset_counters_at(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaState> {
        let mut state = self.load_or_fresh(now).await?;
        if state.roll_windows(now) {
            tracing::info!(
                target: "quota",
                hourly_points = state.hourly_points,
                daily_points = state.daily_points,
                "quota window reset"
            );
            self.store.save(&state).await?;
        }
        Ok(state)
    }

    pub async fn can_perform(&self, action: ActionKind) -> anyhow::Result<bool> {
        self.can_perform_at(action, Utc::now()).await
    }

    pub async fn can_perform_at(
        &self,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let state = self.check_and_reset_counters_at(now).await?;
        let allowed = state.allows(action);
        tracing::debug!(
            target: "quota",
            action = action.as_str(),
            cost = action.cost(),
            hourly_points = state.hourly_points,
            daily_points = state.daily_points,
            allowed,
            "quota check"
        );
        if !allowed {
            counter!("quota_denied_total").increment(1);
        }
        Ok(allowed)
    }

    pub async fn track(&self, action: ActionKind) -> anyhow::Result<QuotaState> {
        self.track_at(action, Utc::now()).await
    }

    /// Reload, add the action's cost to both counters, persist unconditionally.
    pub async fn track_at(
        &self,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaState> {
        let mut state = self.load_or_fresh(now).await?;
        let cost = action.cost();
        state.hourly_points = state.hourly_points.saturating_add(cost);
        state.daily_points = state.daily_points.saturating_add(cost);
        self.store.save(&state).await?;

        gauge!("quota_hourly_points").set(f64::from(state.hourly_points));
        gauge!("quota_daily_points").set(f64::from(state.daily_points));
        tracing::debug!(
            target: "quota",
            action = action.as_str(),
            hourly_points = state.hourly_points,
            daily_points = state.daily_points,
            "quota tracked"
        );
        Ok(state)
    }

    /// Current counters without persisting anything.
    pub async fn snapshot(&self) -> anyhow::Result<QuotaState> {
        let now = Utc::now();
        let mut state = self.load_or_fresh(now).await?;
        state.roll_windows(now);
        Ok(state)
    }

    async fn load_or_fresh(&self, now: DateTime<Utc>) -> anyhow::Result<QuotaState> {
        Ok(self
            .store
            .load()
            .await?
            .unwrap_or_else(|| QuotaState::fresh(now)))
    }
}
