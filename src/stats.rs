//! Daily availability statistics.
//!
//! Reconstructs how long power was on and off during a civil day from
//! the append-only status log: the state just before the day started
//! seeds the fold, each change closes the previous stretch, and the end
//! of the day closes the last one.

use anyhow::Result;
use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use tracing::info;

use crate::db::StatusStore;
use crate::message;
use crate::schedule::civil_day_range;
use crate::traits::{Clock, Notifier};

/// Powered/unpowered totals for one civil day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayTotals {
    pub date: NaiveDate,
    pub powered: chrono::Duration,
    pub unpowered: chrono::Duration,
}

/// Fold the status log over one civil day.
pub async fn day_totals<S: StatusStore>(store: &S, date: NaiveDate, tz: Tz) -> Result<DayTotals> {
    let (day_start, day_end) = civil_day_range(date, tz);

    let mut state = store.last_before(day_start).await?;
    let changes = store.changes_between(day_start, day_end).await?;

    let mut powered = chrono::Duration::zero();
    let mut unpowered = chrono::Duration::zero();
    let mut cursor = day_start;

    for change in changes {
        let stretch = change.at - cursor;
        if state {
            powered += stretch;
        } else {
            unpowered += stretch;
        }
        state = change.status;
        cursor = change.at;
    }

    let tail = day_end - cursor;
    if state {
        powered += tail;
    } else {
        unpowered += tail;
    }

    Ok(DayTotals {
        date,
        powered,
        unpowered,
    })
}

/// Compose and send the report for yesterday.
pub async fn send_daily_report<S, N, C>(store: &S, notifier: &N, clock: &C, tz: Tz) -> Result<()>
where
    S: StatusStore,
    N: Notifier,
    C: Clock,
{
    let today = clock.now_utc().with_timezone(&tz).date_naive();
    let yesterday = today - Days::new(1);

    let totals = day_totals(store, yesterday, tz).await?;
    let text = message::day_stats_message(totals.date, totals.powered, totals.unpowered);

    info!(
        "daily report for {}: {} on, {} off",
        totals.date,
        message::format_duration(totals.powered),
        message::format_duration(totals.unpowered)
    );
    notifier.notify(&text, false).await
}
