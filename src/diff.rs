//! Change detection for the published outage schedule.
//!
//! The provider republishes its schedule freely, often without touching
//! the content. Two tiers keep notifications honest: a cheap freshness
//! marker short-circuits untouched payloads, and a per-date content diff
//! against the persisted projection catches marker bumps that changed
//! nothing. Only dates whose content actually differs are rewritten, each
//! inside one transaction.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{GroupSchedule, ScheduleApiClient};
use crate::config::{NotificationConfig, ProviderConfig};
use crate::db::ScheduleStore;
use crate::message;
use crate::schedule::{self, SchedulePoint};
use crate::traits::{Clock, Notifier};

/// The provider republishes the day shortly after local midnight; fetches
/// inside this window see yesterday's payload and are skipped.
const EARLY_MORNING_MINUTES: u32 = 5;

/// Sole writer of the persisted schedule projection.
pub struct ScheduleDiffEngine<Q, C> {
    store: Q,
    clock: C,
    tz: Tz,
}

impl<Q, C> ScheduleDiffEngine<Q, C>
where
    Q: ScheduleStore,
    C: Clock,
{
    pub fn new(store: Q, clock: C, tz: Tz) -> Self {
        Self { store, clock, tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Current wall-clock time in the schedule's civil timezone.
    pub fn now_local(&self) -> DateTime<Tz> {
        self.clock.now_utc().with_timezone(&self.tz)
    }

    /// Run one diff cycle against a fetched payload.
    ///
    /// Returns the freshly persisted upcoming entries when the content
    /// materially changed, `None` when nothing (or nothing material)
    /// changed. At most one notification-worthy result per actual
    /// provider change.
    pub async fn sync(&self, payload: &GroupSchedule) -> Result<Option<Vec<SchedulePoint>>> {
        if self.store.last_update_marker().await? == Some(payload.updated_on) {
            debug!("provider marker unchanged, skipping diff");
            return Ok(None);
        }
        self.store.save_update_marker(payload.updated_on).await?;

        if payload.today.is_none() {
            warn!("today's schedule missing from provider payload");
        }
        if payload.tomorrow.is_none() {
            warn!("tomorrow's schedule missing from provider payload");
        }

        let now = self.clock.now_utc();
        let days: Vec<_> = payload
            .days()
            .map(|day| {
                let intervals = schedule::merge_intervals(schedule::to_intervals(
                    &day.slots, day.date, self.tz, now,
                ));
                let points: Vec<SchedulePoint> = intervals
                    .iter()
                    .map(|i| SchedulePoint {
                        powered: i.powered,
                        at: i.start,
                    })
                    .collect();
                (day.date, points)
            })
            .collect();

        if days.iter().all(|(_, points)| points.is_empty()) {
            warn!("no valid schedule entries in provider payload");
            return Ok(None);
        }

        let mut changed = false;
        let mut upcoming = Vec::new();

        for (date, points) in days {
            let (day_start, day_end) = schedule::civil_day_range(date, self.tz);
            let persisted = self.store.entries_between(day_start, day_end).await?;

            if points_equivalent(&points, &persisted) {
                debug!("schedule for {date} unchanged");
            } else {
                self.store.replace_day(date, self.tz, &points).await?;
                info!("schedule for {date} replaced, {} entries", points.len());
                changed = true;
            }
            upcoming.extend(points);
        }

        Ok(changed.then_some(upcoming))
    }
}

/// Content equality with a small timestamp tolerance.
///
/// One second absorbs sub-second serialization jitter between what was
/// computed and what came back from the store.
fn points_equivalent(a: &[SchedulePoint], b: &[SchedulePoint]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by_key(|p| p.at);
    b.sort_by_key(|p| p.at);
    a.iter().zip(&b).all(|(x, y)| {
        x.powered == y.powered && (x.at - y.at).abs() <= chrono::Duration::seconds(1)
    })
}

/// The schedule loop: fetch, diff, persist, notify.
///
/// Fetch and store failures are logged and retried on the next tick;
/// they never terminate the loop.
pub async fn run_schedule_loop<Q, N, C>(
    engine: ScheduleDiffEngine<Q, C>,
    api: ScheduleApiClient,
    notifier: &N,
    provider: &ProviderConfig,
    quiet: NotificationConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    Q: ScheduleStore,
    N: Notifier,
    C: Clock,
{
    let mut interval = tokio::time::interval(Duration::from_secs(provider.fetch_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let early_morning = NaiveTime::from_hms_opt(0, EARLY_MORNING_MINUTES, 0)
        .expect("valid time of day");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("schedule loop shutting down");
                return Ok(());
            }
            _ = interval.tick() => {}
        }

        let now_local = engine.now_local();
        if now_local.time() < early_morning {
            debug!("skipping schedule fetch during early morning republish window");
            continue;
        }

        let payload = match api.fetch_schedule().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("schedule fetch failed: {e}");
                continue;
            }
        };

        match engine.sync(&payload).await {
            Ok(Some(points)) => {
                let text = message::schedule_digest(
                    &points,
                    payload.updated_on,
                    &provider.group_id,
                    engine.tz(),
                );
                let silent = message::is_quiet_hour(
                    now_local.hour(),
                    quiet.quiet_start_hour,
                    quiet.quiet_end_hour,
                );
                info!("schedule changed, notifying subscribers");
                if let Err(e) = notifier.notify(&text, silent).await {
                    error!("failed to deliver schedule notification: {e:#}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("schedule cycle failed: {e:#}");
            }
        }
    }
}
