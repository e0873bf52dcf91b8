//! Slot-to-interval conversion and interval algebra for outage schedules.
//!
//! The provider publishes each day as a list of slots in minutes since
//! local midnight. Everything here converts those into canonical UTC
//! intervals: timezone-correct, chronologically sorted, non-overlapping
//! and maximal, and answers "what happens next" queries against them.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, warn};

use crate::api::{RawSlot, SlotKind};

/// End-of-day sentinel used by the provider.
pub const MINUTES_PER_DAY: u32 = 1440;

/// A merged, canonical time range with a single power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub powered: bool,
}

/// A state-change point, the shape in which schedules are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePoint {
    pub powered: bool,
    pub at: DateTime<Utc>,
}

/// The next schedule event relative to a given instant and host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextEvent {
    /// The next planned outage, relevant while power is on.
    Outage {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The expected end of the current or upcoming outage, relevant
    /// while power is off.
    PowerReturns { at: DateTime<Utc> },
}

/// Resolve a civil local datetime to UTC.
///
/// Ambiguous times (autumn fall-back) take the earliest reading; times
/// inside a spring-forward gap are shifted one hour ahead.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            warn!("local time {} does not exist in {}, shifting forward", naive, tz);
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
                .with_timezone(&Utc)
        }
    }
}

/// Convert minutes since local midnight into a UTC instant.
///
/// The arithmetic is done in the civil timezone, so a schedule crossing a
/// DST switch lands on the wall-clock times the provider meant. The 1440
/// sentinel maps to the last representable instant of the date rather
/// than into the next day.
pub fn parse_slot_time(minutes: u32, date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    if minutes >= MINUTES_PER_DAY {
        return end_of_day(date, tz);
    }
    let time = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
        .expect("minutes below 1440 always form a valid time of day");
    resolve_local(date.and_time(time), tz)
}

/// The last representable instant of a civil date.
pub fn end_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .expect("valid time of day");
    resolve_local(date.and_time(last), tz)
}

/// Half-open UTC range `[start of day, start of next day)` of a civil date.
pub fn civil_day_range(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("valid time of day");
    let start = resolve_local(date.and_time(midnight), tz);
    let next = resolve_local((date + Days::new(1)).and_time(midnight), tz);
    (start, next)
}

/// Convert one day's slots into schedule intervals.
///
/// Each slot becomes a `(start, powered)` point. An interval's end is the
/// slot's own end offset when the provider published one; otherwise it is
/// derived as the next point's start, or the end of the civil day for the
/// last slot. Slots with unrecognized types are dropped with a warning.
/// Intervals that have fully elapsed relative to `now` are filtered out;
/// callers re-run the conversion every cycle because "now" keeps advancing.
pub fn to_intervals(
    slots: &[RawSlot],
    date: NaiveDate,
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<ScheduleInterval> {
    let mut parsed: Vec<(SchedulePoint, Option<u32>)> = slots
        .iter()
        .filter_map(|slot| {
            let Some(kind) = SlotKind::parse(&slot.kind) else {
                warn!("dropping slot with unknown type '{}' on {}", slot.kind, date);
                return None;
            };
            let point = SchedulePoint {
                powered: kind.powered(),
                at: parse_slot_time(slot.start, date, tz),
            };
            Some((point, slot.end))
        })
        .collect();
    parsed.sort_by_key(|(p, _)| p.at);

    let day_end = end_of_day(date, tz);
    parsed
        .iter()
        .enumerate()
        .map(|(i, (point, end_minutes))| {
            let end = end_minutes
                .map(|minutes| parse_slot_time(minutes, date, tz))
                .or_else(|| parsed.get(i + 1).map(|(next, _)| next.at))
                .unwrap_or(day_end);
            ScheduleInterval {
                start: point.at,
                end,
                powered: point.powered,
            }
        })
        .filter(|interval| interval.end > now)
        .collect()
}

/// Coalesce adjacent intervals that share a boundary and a power state.
///
/// Single left-to-right sweep after sorting; idempotent, so re-merging
/// already-merged input is a no-op.
pub fn merge_intervals(mut intervals: Vec<ScheduleInterval>) -> Vec<ScheduleInterval> {
    intervals.sort_by_key(|i| i.start);
    let mut merged: Vec<ScheduleInterval> = Vec::with_capacity(intervals.len());
    for current in intervals {
        match merged.last_mut() {
            Some(last) if last.end == current.start && last.powered == current.powered => {
                last.end = current.end;
            }
            _ => merged.push(current),
        }
    }
    merged
}

/// Rebuild intervals from persisted state-change points.
///
/// A point's state holds until the next point; the last point of the set
/// holds until the end of its own civil day.
pub fn points_to_intervals(points: &[SchedulePoint], tz: Tz) -> Vec<ScheduleInterval> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.at);

    let intervals = sorted
        .iter()
        .enumerate()
        .filter_map(|(i, point)| {
            let end = sorted
                .get(i + 1)
                .map(|next| next.at)
                .unwrap_or_else(|| end_of_day(point.at.with_timezone(&tz).date_naive(), tz));
            (end > point.at).then_some(ScheduleInterval {
                start: point.at,
                end,
                powered: point.powered,
            })
        })
        .collect();
    merge_intervals(intervals)
}

/// Find the unique interval containing `now`, if any.
///
/// Merged interval sets are non-overlapping, so at most one can match.
pub fn current_state(
    intervals: &[ScheduleInterval],
    now: DateTime<Utc>,
) -> Option<&ScheduleInterval> {
    intervals.iter().find(|i| i.start <= now && now < i.end)
}

/// Answer "what is the next event" for a sorted, merged interval set.
///
/// While up, the answer is the next planned outage. While down, it is
/// the expected return of power: the end of the containing outage, or of
/// the nearest future one when the schedule has no interval covering
/// `now`. A host that is up in the middle of a known outage means the
/// schedule is stale; that combination reports nothing.
pub fn next_event(
    intervals: &[ScheduleInterval],
    now: DateTime<Utc>,
    currently_up: bool,
) -> Option<NextEvent> {
    let containing_outage = intervals
        .iter()
        .find(|i| !i.powered && i.start <= now && now < i.end);
    let upcoming_outage = intervals.iter().find(|i| !i.powered && i.start > now);

    match (currently_up, containing_outage) {
        (true, Some(outage)) => {
            error!(
                "host is up inside a scheduled outage {} - {}, schedule looks stale",
                outage.start, outage.end
            );
            None
        }
        (true, None) => upcoming_outage.map(|i| NextEvent::Outage {
            start: i.start,
            end: i.end,
        }),
        (false, Some(outage)) => Some(NextEvent::PowerReturns { at: outage.end }),
        (false, None) => upcoming_outage.map(|i| NextEvent::PowerReturns { at: i.end }),
    }
}
