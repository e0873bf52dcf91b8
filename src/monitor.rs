//! Availability monitoring with hysteresis.
//!
//! Raw probe results are noisy: a single dropped packet must never read
//! as an outage. The monitor confirms a status by probing repeatedly
//! inside a bounded window and only then feeds it to the transition
//! state machine, which appends to the status log and raises exactly one
//! event per genuine change.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Days, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{MonitorConfig, NotificationConfig};
use crate::db::{ScheduleStore, StatusRecord, StatusStore};
use crate::message;
use crate::probe::Probe;
use crate::schedule::{self, NextEvent};
use crate::traits::{Clock, Notifier};

/// A confirmed availability transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChanged {
    pub up: bool,
    /// Time spent in the previous state, when the log knows it.
    pub duration: Option<chrono::Duration>,
    pub at: DateTime<Utc>,
}

/// Debounced up/down detector for a single monitored target.
pub struct AvailabilityMonitor<P, S, C> {
    probe: P,
    store: S,
    clock: C,
    window: Duration,
    retry_gap: Duration,
    last_confirmed: Option<StatusRecord>,
}

impl<P, S, C> AvailabilityMonitor<P, S, C>
where
    P: Probe,
    S: StatusStore,
    C: Clock,
{
    pub fn new(probe: P, store: S, clock: C, config: &MonitorConfig) -> Self {
        Self {
            probe,
            store,
            clock,
            window: Duration::from_secs(config.availability_window_secs),
            retry_gap: Duration::from_secs(config.retry_gap_secs),
            last_confirmed: None,
        }
    }

    /// The last confirmed transition, if any.
    pub fn last_confirmed(&self) -> Option<StatusRecord> {
        self.last_confirmed
    }

    /// Restore in-memory state from the status log.
    ///
    /// The persisted log is authoritative; this runs at startup before
    /// the first probe cycle so a restart never invents a transition.
    pub async fn hydrate(&mut self) -> Result<()> {
        self.last_confirmed = self.store.last().await?;
        if let Some(record) = self.last_confirmed {
            info!(
                "restored last confirmed status: {} since {}",
                if record.status { "UP" } else { "DOWN" },
                record.at
            );
        }
        Ok(())
    }

    /// Confirm the current status within the availability window.
    ///
    /// Probes repeatedly with the retry gap between failed attempts. One
    /// success anywhere in the window is enough to call the host up,
    /// which filters transient packet loss; only a window in which every
    /// attempt failed confirms an outage. Dropping the returned future
    /// abandons the window, so shutdown does not wait it out.
    pub async fn confirm_status(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.window;
        loop {
            if self.probe.check().await {
                return true;
            }
            let next_attempt = tokio::time::Instant::now() + self.retry_gap;
            if next_attempt >= deadline {
                return false;
            }
            tokio::time::sleep_until(next_attempt).await;
        }
    }

    /// Feed one confirmed status into the state machine.
    ///
    /// The very first observation seeds the log without raising an
    /// event; repeats are no-ops; a genuine change appends a record and
    /// returns the transition. A store failure surfaces as an error and
    /// leaves the in-memory state untouched, so the same transition is
    /// retried on the next cycle.
    pub async fn process(&mut self, confirmed: bool) -> Result<Option<StatusChanged>> {
        let now = self.clock.now_utc();

        match self.last_confirmed {
            None => {
                self.store.append(confirmed, now).await?;
                self.last_confirmed = Some(StatusRecord {
                    status: confirmed,
                    at: now,
                });
                info!(
                    "initial status is {}",
                    if confirmed { "UP" } else { "DOWN" }
                );
                Ok(None)
            }
            Some(record) if record.status == confirmed => Ok(None),
            Some(_) => {
                let duration = self.store.duration_in_state(confirmed, now).await?;
                self.store.append(confirmed, now).await?;
                self.last_confirmed = Some(StatusRecord {
                    status: confirmed,
                    at: now,
                });
                Ok(Some(StatusChanged {
                    up: confirmed,
                    duration,
                    at: now,
                }))
            }
        }
    }
}

/// Next-event context for a status notification.
///
/// Reads the persisted schedule projection for today and tomorrow and
/// runs the interval query against it. Read failures degrade to "no
/// schedule context" instead of failing the notification.
pub async fn lookup_next_event<Q: ScheduleStore>(
    store: &Q,
    tz: Tz,
    now: DateTime<Utc>,
    currently_up: bool,
) -> Option<NextEvent> {
    let today = now.with_timezone(&tz).date_naive();
    let (window_start, _) = schedule::civil_day_range(today, tz);
    let (_, window_end) = schedule::civil_day_range(today + Days::new(1), tz);

    match store.entries_between(window_start, window_end).await {
        Ok(points) => {
            let intervals = schedule::points_to_intervals(&points, tz);
            schedule::next_event(&intervals, now, currently_up)
        }
        Err(e) => {
            warn!("failed to read persisted schedule: {e:#}");
            None
        }
    }
}

/// The availability loop: probe, detect transitions, notify.
///
/// Runs until the shutdown signal flips. Errors inside a cycle are
/// logged and followed by a short backoff; they never terminate the loop.
pub async fn run_availability_loop<P, S, Q, N, C>(
    mut monitor: AvailabilityMonitor<P, S, C>,
    schedule_store: &Q,
    notifier: &N,
    tz: Tz,
    quiet: NotificationConfig,
    config: &MonitorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    P: Probe,
    S: StatusStore,
    Q: ScheduleStore,
    N: Notifier,
    C: Clock,
{
    monitor.hydrate().await?;

    let mut interval = tokio::time::interval(Duration::from_secs(config.check_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let backoff = Duration::from_secs(config.error_backoff_secs);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("availability loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {}
        }

        let confirmed = tokio::select! {
            _ = shutdown.changed() => {
                info!("availability loop shutting down, abandoning probe window");
                return Ok(());
            }
            confirmed = monitor.confirm_status() => confirmed,
        };

        match monitor.process(confirmed).await {
            Ok(Some(event)) => {
                let next = lookup_next_event(schedule_store, tz, event.at, event.up).await;
                let text = message::status_change_message(&event, next, tz);
                let silent = message::is_quiet_hour(
                    event.at.with_timezone(&tz).hour(),
                    quiet.quiet_start_hour,
                    quiet.quiet_end_hour,
                );
                info!("status changed: {}", text.replace('\n', " | "));
                if let Err(e) = notifier.notify(&text, silent).await {
                    error!("failed to deliver status notification: {e:#}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("availability cycle failed: {e:#}");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
