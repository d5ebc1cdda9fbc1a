// tests/quota_ledger.rs
//
// Budget boundaries and lazy window resets, driven with explicit timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};

use factcheck_bot::quota::{
    ActionKind, JsonFileStore, MemoryStore, QuotaLedger, QuotaState, DAILY_POINTS, HOURLY_POINTS,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap()
}

fn state(hourly: u32, daily: u32) -> QuotaState {
    QuotaState {
        hourly_points: hourly,
        daily_points: daily,
        last_hour_reset: t0(),
        last_day_reset: t0(),
    }
}

#[tokio::test]
async fn create_allowed_exactly_at_hourly_boundary() {
    let ledger = QuotaLedger::new(MemoryStore::with_state(state(HOURLY_POINTS - 3, 0)));
    assert!(ledger.can_perform_at(ActionKind::Create, t0()).await.unwrap());

    let ledger = QuotaLedger::new(MemoryStore::with_state(state(HOURLY_POINTS - 2, 0)));
    assert!(!ledger.can_perform_at(ActionKind::Create, t0()).await.unwrap());
    assert!(ledger.can_perform_at(ActionKind::Update, t0()).await.unwrap());
}

#[tokio::test]
async fn daily_budget_blocks_even_with_hourly_room() {
    let ledger = QuotaLedger::new(MemoryStore::with_state(state(0, DAILY_POINTS - 1)));
    assert!(!ledger.can_perform_at(ActionKind::Create, t0()).await.unwrap());
    assert!(ledger.can_perform_at(ActionKind::Delete, t0()).await.unwrap());
}

#[tokio::test]
async fn hourly_window_resets_only_after_a_full_hour() {
    let store = MemoryStore::with_state(state(4_000, 4_000));
    let ledger = QuotaLedger::new(store.clone());

    let before = ledger
        .check_and_reset_counters_at(t0() + Duration::seconds(3_599))
        .await
        .unwrap();
    assert_eq!(before.hourly_points, 4_000);

    let exactly = ledger
        .check_and_reset_counters_at(t0() + Duration::seconds(3_600))
        .await
        .unwrap();
    assert_eq!(exactly.hourly_points, 4_000);

    let after_at = t0() + Duration::seconds(3_601);
    let after = ledger.check_and_reset_counters_at(after_at).await.unwrap();
    assert_eq!(after.hourly_points, 0);
    assert_eq!(after.daily_points, 4_000);
    assert_eq!(after.last_hour_reset, after_at);

    // the reset is persisted
    assert_eq!(store.get().unwrap().hourly_points, 0);
}

#[tokio::test]
async fn daily_window_resets_both_counters_after_a_day() {
    let ledger = QuotaLedger::new(MemoryStore::with_state(state(100, 30_000)));
    let later = t0() + Duration::seconds(86_401);
    let s = ledger.check_and_reset_counters_at(later).await.unwrap();
    assert_eq!((s.hourly_points, s.daily_points), (0, 0));
    assert_eq!(s.last_day_reset, later);
}

#[tokio::test]
async fn track_adds_cost_to_both_counters() {
    let store = MemoryStore::with_state(state(10, 20));
    let ledger = QuotaLedger::new(store.clone());

    ledger.track_at(ActionKind::Create, t0()).await.unwrap();
    ledger.track_at(ActionKind::Update, t0()).await.unwrap();
    ledger.track_at(ActionKind::Delete, t0()).await.unwrap();

    let s = store.get().unwrap();
    assert_eq!(s.hourly_points, 16);
    assert_eq!(s.daily_points, 26);
}

#[tokio::test]
async fn missing_record_starts_fresh_without_persisting() {
    let store = MemoryStore::new();
    let ledger = QuotaLedger::new(store.clone());

    let s = ledger.check_and_reset_counters_at(t0()).await.unwrap();
    assert_eq!((s.hourly_points, s.daily_points), (0, 0));
    assert!(store.get().is_none());
}

#[tokio::test]
async fn file_store_survives_a_new_ledger_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("ratelimit.json");

    let first = QuotaLedger::new(JsonFileStore::new(&path));
    first.track_at(ActionKind::Create, t0()).await.unwrap();
    first.track_at(ActionKind::Create, t0()).await.unwrap();

    let second = QuotaLedger::new(JsonFileStore::new(&path));
    let s = second
        .check_and_reset_counters_at(t0() + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(s.hourly_points, 6);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"hourlyPoints\": 6"));
    assert!(raw.contains("lastDayReset"));
}
