//! Svitlomon Library
//!
//! This module exposes the core components of the svitlomon power
//! availability monitor for testing and potential reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod diff;
pub mod message;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod schedule;
pub mod stats;
pub mod traits;

// Re-export commonly used types
pub use api::{DaySchedule, FetchError, GroupSchedule, RawSlot, ScheduleApiClient, SlotKind};
pub use config::AppConfig;
pub use db::{
    Database, MemoryScheduleStore, MemoryStatusStore, ScheduleStore, StatusRecord, StatusStore,
};
pub use diff::ScheduleDiffEngine;
pub use monitor::{AvailabilityMonitor, StatusChanged};
pub use notify::TelegramNotifier;
pub use probe::{MockProbe, Probe, TcpProbe};
pub use schedule::{
    NextEvent, ScheduleInterval, SchedulePoint, civil_day_range, current_state, end_of_day,
    merge_intervals, next_event, parse_slot_time, points_to_intervals, to_intervals,
};
pub use stats::DayTotals;
pub use traits::{Clock, MockClock, MockNotifier, Notifier, SystemClock};
