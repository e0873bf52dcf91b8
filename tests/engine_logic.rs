//! Integration tests for the core engines using mock dependencies.
//!
//! These tests wire the availability monitor, the diff engine, the
//! interval processor and the composer together the way the loops do,
//! with MockClock, MockProbe and in-memory stores for deterministic
//! behavior.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Europe::Kyiv;
use svitlomon::{
    AvailabilityMonitor, MemoryScheduleStore, MemoryStatusStore, MockClock, MockNotifier,
    MockProbe, Notifier, ScheduleDiffEngine, SchedulePoint, ScheduleStore,
    api::{DaySchedule, GroupSchedule, RawSlot},
    config::{MonitorConfig, NotificationConfig},
    message, monitor,
};

fn kyiv(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Kyiv.with_ymd_and_hms(2024, 11, d, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn slot(start: u32, kind: &str) -> RawSlot {
    RawSlot {
        start,
        end: None,
        kind: kind.to_string(),
    }
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        availability_window_secs: 30,
        retry_gap_secs: 2,
        ..MonitorConfig::default()
    }
}

// ==================== Transition Notification Flow ====================

/// A confirmed outage produces one message carrying the expected return
/// time from the persisted schedule projection.
#[tokio::test]
async fn test_outage_notification_includes_expected_return() {
    let status_store = MemoryStatusStore::new();
    let schedule_store = MemoryScheduleStore::new();
    let notifier = MockNotifier::new();

    // The projection knows about a 10:00-12:00 outage today.
    schedule_store
        .replace_day(
            NaiveDate::from_ymd_opt(2024, 11, 28).unwrap(),
            Kyiv,
            &[
                SchedulePoint {
                    powered: true,
                    at: kyiv(28, 0, 0),
                },
                SchedulePoint {
                    powered: false,
                    at: kyiv(28, 10, 0),
                },
                SchedulePoint {
                    powered: true,
                    at: kyiv(28, 12, 0),
                },
            ],
        )
        .await
        .unwrap();

    let clock = MockClock::new(kyiv(28, 8, 0));
    let mut availability = AvailabilityMonitor::new(
        MockProbe::new([true]),
        status_store.clone(),
        clock.clone(),
        &monitor_config(),
    );

    // Host starts up, then the power goes out at 10:30.
    availability.process(true).await.unwrap();
    clock.set_time(kyiv(28, 10, 30));

    let event = availability.process(false).await.unwrap().unwrap();
    let next = monitor::lookup_next_event(&schedule_store, Kyiv, event.at, event.up).await;
    let text = message::status_change_message(&event, next, Kyiv);

    notifier.notify(&text, false).await.unwrap();

    let sent = notifier.get_notifications();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.contains("🔴 10:30 Світло зникло"));
    assert!(sent[0].0.contains("Воно було 2 год. 30 хв."));
    assert!(sent[0].0.contains("Очікуємо за графіком о 12:00"));
}

/// Recovery while the schedule knows the next outage mentions it.
#[tokio::test]
async fn test_recovery_notification_includes_next_outage() {
    let status_store = MemoryStatusStore::new();
    let schedule_store = MemoryScheduleStore::new();

    schedule_store
        .replace_day(
            NaiveDate::from_ymd_opt(2024, 11, 28).unwrap(),
            Kyiv,
            &[
                SchedulePoint {
                    powered: false,
                    at: kyiv(28, 18, 0),
                },
                SchedulePoint {
                    powered: true,
                    at: kyiv(28, 20, 0),
                },
            ],
        )
        .await
        .unwrap();

    let clock = MockClock::new(kyiv(28, 10, 0));
    let mut availability = AvailabilityMonitor::new(
        MockProbe::new([true]),
        status_store.clone(),
        clock.clone(),
        &monitor_config(),
    );

    availability.process(false).await.unwrap();
    clock.set_time(kyiv(28, 14, 0));

    let event = availability.process(true).await.unwrap().unwrap();
    let next = monitor::lookup_next_event(&schedule_store, Kyiv, event.at, event.up).await;
    let text = message::status_change_message(&event, next, Kyiv);

    assert!(text.contains("🟢 14:00 Світло з'явилося"));
    assert!(text.contains("Його не було 4 год."));
    assert!(text.contains("Наступне планове: 18:00 - 20:00"));
}

/// The stale-schedule combination reports no schedule context at all.
#[tokio::test]
async fn test_stale_schedule_suppresses_context() {
    let schedule_store = MemoryScheduleStore::new();

    schedule_store
        .replace_day(
            NaiveDate::from_ymd_opt(2024, 11, 28).unwrap(),
            Kyiv,
            &[
                SchedulePoint {
                    powered: false,
                    at: kyiv(28, 10, 0),
                },
                SchedulePoint {
                    powered: true,
                    at: kyiv(28, 12, 0),
                },
            ],
        )
        .await
        .unwrap();

    // Up at 11:00 while the schedule says the outage is running.
    let next = monitor::lookup_next_event(&schedule_store, Kyiv, kyiv(28, 11, 0), true).await;
    assert_eq!(next, None);
}

// ==================== Diff Dedup Flow ====================

/// Feeding the diff engine the same payload twice yields exactly one set
/// of persisted writes and one notification, the way the schedule loop
/// drives it.
#[tokio::test]
async fn test_same_payload_notifies_once() {
    let store = MemoryScheduleStore::new();
    let notifier = MockNotifier::new();
    let clock = MockClock::new(kyiv(28, 3, 0));
    let engine = ScheduleDiffEngine::new(store.clone(), clock, Kyiv);

    let payload = GroupSchedule {
        today: Some(DaySchedule {
            date: NaiveDate::from_ymd_opt(2024, 11, 28).unwrap(),
            slots: vec![
                slot(0, "NotPlanned"),
                slot(600, "Definite"),
                slot(720, "NotPlanned"),
            ],
        }),
        tomorrow: None,
        updated_on: kyiv(28, 2, 0),
    };

    for _ in 0..2 {
        if let Some(points) = engine.sync(&payload).await.unwrap() {
            let text = message::schedule_digest(&points, payload.updated_on, "1", Kyiv);
            notifier.notify(&text, false).await.unwrap();
        }
    }

    assert_eq!(store.replace_count(), 1);
    assert_eq!(notifier.notification_count(), 1);

    let sent = notifier.get_notifications();
    assert!(sent[0].0.contains("Графік відключень, 1 група"));
    assert!(sent[0].0.contains("▪️ 10:00 - 12:00  [2 год.]"));
}

// ==================== Quiet Hours Flow ====================

/// A transition in the middle of the night is delivered silently.
#[tokio::test]
async fn test_night_transition_is_silent() {
    let status_store = MemoryStatusStore::new();
    let notifier = MockNotifier::new();
    let quiet = NotificationConfig::default();

    let clock = MockClock::new(kyiv(28, 1, 0));
    let mut availability = AvailabilityMonitor::new(
        MockProbe::new([true]),
        status_store.clone(),
        clock.clone(),
        &monitor_config(),
    );

    availability.process(true).await.unwrap();
    clock.set_time(kyiv(28, 2, 30));

    let event = availability.process(false).await.unwrap().unwrap();
    let text = message::status_change_message(&event, None, Kyiv);
    let silent = message::is_quiet_hour(
        event.at.with_timezone(&Kyiv).hour(),
        quiet.quiet_start_hour,
        quiet.quiet_end_hour,
    );
    notifier.notify(&text, silent).await.unwrap();

    let sent = notifier.get_notifications();
    assert!(sent[0].1, "02:30 local falls inside the 23-7 quiet window");
}

/// The same transition during the day rings through.
#[tokio::test]
async fn test_day_transition_is_audible() {
    let quiet = NotificationConfig::default();
    let at = kyiv(28, 14, 30);
    let silent = message::is_quiet_hour(
        at.with_timezone(&Kyiv).hour(),
        quiet.quiet_start_hour,
        quiet.quiet_end_hour,
    );
    assert!(!silent);
}
