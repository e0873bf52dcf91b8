use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use sqlx::PgPool;

use crate::schedule::{SchedulePoint, civil_day_range};

/// A single entry of the append-only availability log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    pub status: bool,
    pub at: DateTime<Utc>,
}

// ==================== Store Contracts ====================

/// Append-only availability log.
///
/// Exactly one monitor instance owns writes for a target; timestamps are
/// strictly increasing. Range queries are half-open: `[start, end)`.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn append(&self, status: bool, at: DateTime<Utc>) -> Result<()>;

    /// The most recent record, if any.
    async fn last(&self) -> Result<Option<StatusRecord>>;

    /// The status in effect just before `t`. With no history the host is
    /// assumed up; that default is a policy choice, not missing data.
    async fn last_before(&self, t: DateTime<Utc>) -> Result<bool>;

    /// How long the host has been in `current` state: `now` minus the
    /// timestamp of the newest record carrying the opposite status.
    /// `None` when no opposite record exists yet.
    async fn duration_in_state(
        &self,
        current: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<chrono::Duration>>;

    async fn changes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusRecord>>;
}

/// Durable projection of the latest outage schedule.
///
/// The diff engine is the only writer; `replace_day` swaps one civil
/// day's entries atomically so readers never observe a half-updated day.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn replace_day(&self, date: NaiveDate, tz: Tz, entries: &[SchedulePoint]) -> Result<()>;

    /// Entries in the half-open range `[start, end)`, ordered by time.
    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SchedulePoint>>;

    async fn last_update_marker(&self) -> Result<Option<DateTime<Utc>>>;

    async fn save_update_marker(&self, at: DateTime<Utc>) -> Result<()>;
}

// ==================== PostgreSQL Implementation ====================

#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StatusStore for Database {
    async fn append(&self, status: bool, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO host_status (status, at) VALUES ($1, $2)")
            .bind(status)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("Failed to insert status record")?;
        Ok(())
    }

    async fn last(&self) -> Result<Option<StatusRecord>> {
        let row: Option<(bool, DateTime<Utc>)> =
            sqlx::query_as("SELECT status, at FROM host_status ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch latest status record")?;

        Ok(row.map(|(status, at)| StatusRecord { status, at }))
    }

    async fn last_before(&self, t: DateTime<Utc>) -> Result<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT status FROM host_status WHERE at < $1 ORDER BY at DESC LIMIT 1")
                .bind(t)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch status before instant")?;

        Ok(row.map(|(status,)| status).unwrap_or(true))
    }

    async fn duration_in_state(
        &self,
        current: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<chrono::Duration>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT at FROM host_status WHERE status = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(!current)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last opposite-status record")?;

        Ok(row.map(|(at,)| now - at))
    }

    async fn changes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusRecord>> {
        let rows: Vec<(bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT status, at FROM host_status WHERE at >= $1 AND at < $2 ORDER BY at ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch status changes for range")?;

        Ok(rows
            .into_iter()
            .map(|(status, at)| StatusRecord { status, at })
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for Database {
    async fn replace_day(&self, date: NaiveDate, tz: Tz, entries: &[SchedulePoint]) -> Result<()> {
        let (day_start, day_end) = civil_day_range(date, tz);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open schedule transaction")?;

        sqlx::query("DELETE FROM outage_schedule WHERE at >= $1 AND at < $2")
            .bind(day_start)
            .bind(day_end)
            .execute(&mut *tx)
            .await
            .context("Failed to clear schedule entries for date")?;

        for entry in entries {
            sqlx::query("INSERT INTO outage_schedule (powered, at) VALUES ($1, $2)")
                .bind(entry.powered)
                .bind(entry.at)
                .execute(&mut *tx)
                .await
                .context("Failed to insert schedule entry")?;
        }

        tx.commit()
            .await
            .context("Failed to commit schedule replacement")?;
        Ok(())
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SchedulePoint>> {
        let rows: Vec<(bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT powered, at FROM outage_schedule WHERE at >= $1 AND at < $2 ORDER BY at ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch schedule entries for range")?;

        Ok(rows
            .into_iter()
            .map(|(powered, at)| SchedulePoint { powered, at })
            .collect())
    }

    async fn last_update_marker(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT updated_on FROM schedule_update_tracker ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch schedule update marker")?;

        Ok(row.map(|(at,)| at))
    }

    async fn save_update_marker(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO schedule_update_tracker (updated_on) VALUES ($1)")
            .bind(at)
            .execute(&self.pool)
            .await
            .context("Failed to save schedule update marker")?;
        Ok(())
    }
}

// ==================== In-Memory Implementations ====================

/// In-memory status store for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    records: Arc<Mutex<Vec<StatusRecord>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail, to exercise persistence
    /// failure handling.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<StatusRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn append(&self, status: bool, at: DateTime<Utc>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated status store write failure");
        }
        self.records.lock().unwrap().push(StatusRecord { status, at });
        Ok(())
    }

    async fn last(&self) -> Result<Option<StatusRecord>> {
        Ok(self.records.lock().unwrap().last().copied())
    }

    async fn last_before(&self, t: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.at < t)
            .map(|r| r.status)
            .unwrap_or(true))
    }

    async fn duration_in_state(
        &self,
        current: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<chrono::Duration>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.status == !current)
            .map(|r| now - r.at))
    }

    async fn changes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusRecord>> {
        let mut records: Vec<StatusRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.at >= start && r.at < end)
            .copied()
            .collect();
        records.sort_by_key(|r| r.at);
        Ok(records)
    }
}

/// In-memory schedule store for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryScheduleStore {
    points: Arc<Mutex<Vec<SchedulePoint>>>,
    marker: Arc<Mutex<Option<DateTime<Utc>>>>,
    replace_calls: Arc<AtomicUsize>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `replace_day` writes so far.
    pub fn replace_count(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn points(&self) -> Vec<SchedulePoint> {
        let mut points = self.points.lock().unwrap().clone();
        points.sort_by_key(|p| p.at);
        points
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn replace_day(&self, date: NaiveDate, tz: Tz, entries: &[SchedulePoint]) -> Result<()> {
        let (day_start, day_end) = civil_day_range(date, tz);
        let mut points = self.points.lock().unwrap();
        points.retain(|p| p.at < day_start || p.at >= day_end);
        points.extend_from_slice(entries);
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SchedulePoint>> {
        let mut points: Vec<SchedulePoint> = self
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.at >= start && p.at < end)
            .copied()
            .collect();
        points.sort_by_key(|p| p.at);
        Ok(points)
    }

    async fn last_update_marker(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.marker.lock().unwrap())
    }

    async fn save_update_marker(&self, at: DateTime<Utc>) -> Result<()> {
        *self.marker.lock().unwrap() = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Europe::Kyiv;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 28, h, m, 0).unwrap()
    }

    // ==================== MemoryStatusStore Tests ====================

    #[tokio::test]
    async fn test_status_store_append_and_last() {
        let store = MemoryStatusStore::new();
        assert!(store.last().await.unwrap().is_none());

        store.append(true, at(8, 0)).await.unwrap();
        store.append(false, at(9, 0)).await.unwrap();

        let last = store.last().await.unwrap().unwrap();
        assert!(!last.status);
        assert_eq!(last.at, at(9, 0));
    }

    #[tokio::test]
    async fn test_last_before_defaults_to_up_with_empty_store() {
        let store = MemoryStatusStore::new();
        assert!(store.last_before(at(12, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_before_picks_newest_earlier_record() {
        let store = MemoryStatusStore::new();
        store.append(true, at(8, 0)).await.unwrap();
        store.append(false, at(9, 0)).await.unwrap();
        store.append(true, at(10, 0)).await.unwrap();

        assert!(!store.last_before(at(9, 30)).await.unwrap());
        assert!(store.last_before(at(8, 30)).await.unwrap());
        // Boundary: a record exactly at `t` is not "before" it.
        assert!(store.last_before(at(9, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duration_in_state() {
        let store = MemoryStatusStore::new();
        store.append(true, at(8, 0)).await.unwrap();
        store.append(false, at(9, 0)).await.unwrap();

        // Measured against the newest record of the opposite status.
        let duration = store.duration_in_state(false, at(11, 0)).await.unwrap();
        assert_eq!(duration, Some(chrono::Duration::hours(3)));

        let duration = store.duration_in_state(true, at(11, 0)).await.unwrap();
        assert_eq!(duration, Some(chrono::Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_duration_in_state_no_opposite_record() {
        let store = MemoryStatusStore::new();
        store.append(true, at(8, 0)).await.unwrap();
        let duration = store.duration_in_state(true, at(9, 0)).await.unwrap();
        assert_eq!(duration, None);
    }

    #[tokio::test]
    async fn test_changes_between_is_half_open() {
        let store = MemoryStatusStore::new();
        store.append(true, at(8, 0)).await.unwrap();
        store.append(false, at(9, 0)).await.unwrap();
        store.append(true, at(10, 0)).await.unwrap();

        let changes = store.changes_between(at(8, 0), at(10, 0)).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].at, at(8, 0));
        assert_eq!(changes[1].at, at(9, 0));
    }

    #[tokio::test]
    async fn test_failing_writes_surface_errors() {
        let store = MemoryStatusStore::new();
        store.set_fail_writes(true);
        assert!(store.append(true, at(8, 0)).await.is_err());
        assert_eq!(store.record_count(), 0);
    }

    // ==================== MemoryScheduleStore Tests ====================

    fn point(h: u32, powered: bool) -> SchedulePoint {
        SchedulePoint {
            powered,
            at: Kyiv
                .with_ymd_and_hms(2024, 11, 28, h, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn test_replace_day_swaps_only_that_day() {
        let store = MemoryScheduleStore::new();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 11, 28).unwrap();
        let next_date = chrono::NaiveDate::from_ymd_opt(2024, 11, 29).unwrap();

        store
            .replace_day(date, Kyiv, &[point(10, false), point(12, true)])
            .await
            .unwrap();
        let tomorrow_point = SchedulePoint {
            powered: false,
            at: Kyiv
                .with_ymd_and_hms(2024, 11, 29, 8, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
        };
        store
            .replace_day(next_date, Kyiv, &[tomorrow_point])
            .await
            .unwrap();

        // Replacing today again must leave tomorrow untouched.
        store
            .replace_day(date, Kyiv, &[point(14, false)])
            .await
            .unwrap();

        let points = store.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], point(14, false));
        assert_eq!(points[1], tomorrow_point);
        assert_eq!(store.replace_count(), 3);
    }

    #[tokio::test]
    async fn test_update_marker_round_trip() {
        let store = MemoryScheduleStore::new();
        assert!(store.last_update_marker().await.unwrap().is_none());

        store.save_update_marker(at(10, 0)).await.unwrap();
        assert_eq!(store.last_update_marker().await.unwrap(), Some(at(10, 0)));

        store.save_update_marker(at(11, 0)).await.unwrap();
        assert_eq!(store.last_update_marker().await.unwrap(), Some(at(11, 0)));
    }
}
