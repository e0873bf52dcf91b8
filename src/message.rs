//! Outbound message composition.
//!
//! Turns availability and schedule events into the Ukrainian-language
//! texts delivered to subscribers. All clock times are rendered in the
//! configured civil timezone.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::monitor::StatusChanged;
use crate::schedule::{NextEvent, SchedulePoint};

/// Render a duration as hours and minutes, e.g. "2 год. 15 хв.".
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_minutes = duration.num_seconds() / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours} год."));
    }
    if minutes > 0 || hours == 0 {
        parts.push(format!("{minutes} хв."));
    }
    parts.join(" ")
}

/// Whether a local hour falls into the configured quiet window.
///
/// The window may wrap past midnight (the default 23-7 does).
pub fn is_quiet_hour(hour: u32, quiet_start: u32, quiet_end: u32) -> bool {
    if quiet_start <= quiet_end {
        (quiet_start..quiet_end).contains(&hour)
    } else {
        hour >= quiet_start || hour < quiet_end
    }
}

/// Compose the message for a confirmed availability transition.
pub fn status_change_message(event: &StatusChanged, next: Option<NextEvent>, tz: Tz) -> String {
    let local_time = event.at.with_timezone(&tz).format("%H:%M");
    let duration = event
        .duration
        .map(format_duration)
        .unwrap_or_else(|| "невідомо".to_string());

    if event.up {
        let mut message = format!(
            "🟢 {local_time} Світло з'явилося\n🕓 Його не було {duration}"
        );
        if let Some(NextEvent::Outage { start, end }) = next {
            message.push_str(&format!(
                "\n🗓 Наступне планове: {} - {}",
                start.with_timezone(&tz).format("%H:%M"),
                end.with_timezone(&tz).format("%H:%M")
            ));
        }
        message
    } else {
        let mut message = format!(
            "🔴 {local_time} Світло зникло\n🕓 Воно було {duration}"
        );
        if let Some(NextEvent::PowerReturns { at }) = next {
            message.push_str(&format!(
                "\n🗓 Очікуємо за графіком о {}",
                at.with_timezone(&tz).format("%H:%M")
            ));
        }
        message
    }
}

/// Compose the digest sent when the published schedule changes.
///
/// Entries are grouped by civil date; each outage span renders as a line
/// with its duration. An empty upcoming schedule gets its own line.
pub fn schedule_digest(
    points: &[SchedulePoint],
    updated_on: DateTime<Utc>,
    group_id: &str,
    tz: Tz,
) -> String {
    let mut lines = vec![
        format!("🗓️ Графік відключень, {group_id} група"),
        format!(
            "🔄 Оновлено: {}",
            updated_on.with_timezone(&tz).format("%d.%m.%Y %H:%M")
        ),
    ];

    let mut by_date: BTreeMap<NaiveDate, Vec<SchedulePoint>> = BTreeMap::new();
    for point in points {
        by_date
            .entry(point.at.with_timezone(&tz).date_naive())
            .or_default()
            .push(*point);
    }

    let mut any_outage = false;
    for (date, mut entries) in by_date {
        entries.sort_by_key(|p| p.at);

        let spans: Vec<String> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.powered)
            .filter_map(|(i, entry)| {
                // An outage span closes at the next restore point of the
                // same day; a span still open at end of day is omitted.
                let end = entries[i + 1..].iter().find(|e| e.powered)?;
                Some(format!(
                    "▪️ {} - {}  [{}]",
                    entry.at.with_timezone(&tz).format("%H:%M"),
                    end.at.with_timezone(&tz).format("%H:%M"),
                    format_duration(end.at - entry.at)
                ))
            })
            .collect();

        if !spans.is_empty() {
            any_outage = true;
            lines.push(format!("\nна {}", date.format("%d.%m.%Y")));
            lines.extend(spans);
        }
    }

    if !any_outage {
        lines.push("▪️ Наразі незаплановано".to_string());
    }

    lines.join("\n")
}

/// Compose the daily statistics message.
pub fn day_stats_message(
    date: NaiveDate,
    powered: chrono::Duration,
    unpowered: chrono::Duration,
) -> String {
    let header = format!("💡 Статистика за вчора ({}):\n", date.format("%Y-%m-%d"));

    let body = if unpowered == chrono::Duration::zero() {
        "\n🥳 Електрика була увесь день!".to_string()
    } else if powered == chrono::Duration::zero() {
        "\n😞 Електрика була відсутня весь день.".to_string()
    } else {
        format!(
            "\n🟢 Електрика присутня: {}.\n🔴 Електрика відсутня: {}.",
            format_duration(powered),
            format_duration(unpowered)
        )
    };

    header + &body
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Europe::Kyiv;

    use super::*;

    fn kyiv(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Kyiv.with_ymd_and_hms(2024, 11, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    // ==================== format_duration Tests ====================

    #[test]
    fn test_format_duration_hours_and_minutes() {
        assert_eq!(
            format_duration(chrono::Duration::minutes(135)),
            "2 год. 15 хв."
        );
    }

    #[test]
    fn test_format_duration_whole_hours() {
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3 год.");
    }

    #[test]
    fn test_format_duration_minutes_only() {
        assert_eq!(format_duration(chrono::Duration::minutes(45)), "45 хв.");
    }

    #[test]
    fn test_format_duration_zero() {
        assert_eq!(format_duration(chrono::Duration::zero()), "0 хв.");
    }

    #[test]
    fn test_format_duration_truncates_seconds() {
        assert_eq!(format_duration(chrono::Duration::seconds(119)), "1 хв.");
    }

    // ==================== is_quiet_hour Tests ====================

    #[test]
    fn test_quiet_hours_wrap_past_midnight() {
        assert!(is_quiet_hour(23, 23, 7));
        assert!(is_quiet_hour(0, 23, 7));
        assert!(is_quiet_hour(6, 23, 7));
        assert!(!is_quiet_hour(7, 23, 7));
        assert!(!is_quiet_hour(12, 23, 7));
        assert!(!is_quiet_hour(22, 23, 7));
    }

    #[test]
    fn test_quiet_hours_plain_window() {
        assert!(is_quiet_hour(2, 1, 5));
        assert!(!is_quiet_hour(5, 1, 5));
        assert!(!is_quiet_hour(0, 1, 5));
    }

    // ==================== status_change_message Tests ====================

    #[test]
    fn test_power_restored_message() {
        let event = StatusChanged {
            up: true,
            duration: Some(chrono::Duration::minutes(150)),
            at: kyiv(28, 14, 30),
        };
        let next = Some(NextEvent::Outage {
            start: kyiv(28, 18, 0),
            end: kyiv(28, 20, 0),
        });

        let message = status_change_message(&event, next, Kyiv);
        assert_eq!(
            message,
            "🟢 14:30 Світло з'явилося\n\
             🕓 Його не було 2 год. 30 хв.\n\
             🗓 Наступне планове: 18:00 - 20:00"
        );
    }

    #[test]
    fn test_power_lost_message() {
        let event = StatusChanged {
            up: false,
            duration: Some(chrono::Duration::hours(5)),
            at: kyiv(28, 14, 30),
        };
        let next = Some(NextEvent::PowerReturns {
            at: kyiv(28, 16, 0),
        });

        let message = status_change_message(&event, next, Kyiv);
        assert_eq!(
            message,
            "🔴 14:30 Світло зникло\n\
             🕓 Воно було 5 год.\n\
             🗓 Очікуємо за графіком о 16:00"
        );
    }

    #[test]
    fn test_message_without_schedule_context() {
        let event = StatusChanged {
            up: false,
            duration: None,
            at: kyiv(28, 14, 30),
        };

        let message = status_change_message(&event, None, Kyiv);
        assert_eq!(message, "🔴 14:30 Світло зникло\n🕓 Воно було невідомо");
    }

    #[test]
    fn test_message_renders_local_time() {
        // 12:30 UTC is 14:30 in Kyiv during winter.
        let event = StatusChanged {
            up: true,
            duration: None,
            at: Utc.with_ymd_and_hms(2024, 11, 28, 12, 30, 0).unwrap(),
        };
        let message = status_change_message(&event, None, Kyiv);
        assert!(message.starts_with("🟢 14:30"));
    }

    // ==================== schedule_digest Tests ====================

    fn point(d: u32, h: u32, powered: bool) -> SchedulePoint {
        SchedulePoint {
            powered,
            at: kyiv(d, h, 0),
        }
    }

    #[test]
    fn test_digest_groups_by_date() {
        let points = vec![
            point(28, 10, false),
            point(28, 12, true),
            point(29, 8, false),
            point(29, 10, true),
        ];
        let digest = schedule_digest(&points, kyiv(28, 9, 0), "1", Kyiv);

        assert!(digest.starts_with("🗓️ Графік відключень, 1 група"));
        assert!(digest.contains("🔄 Оновлено: 28.11.2024 09:00"));
        assert!(digest.contains("на 28.11.2024"));
        assert!(digest.contains("▪️ 10:00 - 12:00  [2 год.]"));
        assert!(digest.contains("на 29.11.2024"));
        assert!(digest.contains("▪️ 08:00 - 10:00  [2 год.]"));
    }

    #[test]
    fn test_digest_empty_schedule() {
        let digest = schedule_digest(&[], kyiv(28, 9, 0), "2", Kyiv);
        assert!(digest.contains("▪️ Наразі незаплановано"));
    }

    #[test]
    fn test_digest_skips_open_ended_outage() {
        // A final outage point with no restore after it renders nothing.
        let points = vec![point(28, 10, false), point(28, 12, true), point(28, 22, false)];
        let digest = schedule_digest(&points, kyiv(28, 9, 0), "1", Kyiv);
        assert!(digest.contains("▪️ 10:00 - 12:00"));
        assert!(!digest.contains("22:00"));
    }

    #[test]
    fn test_digest_each_outage_point_closes_at_next_restore() {
        let points = vec![point(28, 10, false), point(28, 11, false), point(28, 12, true)];
        let digest = schedule_digest(&points, kyiv(28, 9, 0), "1", Kyiv);
        assert!(digest.contains("▪️ 10:00 - 12:00  [2 год.]"));
        assert!(digest.contains("▪️ 11:00 - 12:00  [1 год.]"));
    }

    // ==================== day_stats_message Tests ====================

    #[test]
    fn test_day_stats_full_day_on() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 27).unwrap();
        let message =
            day_stats_message(date, chrono::Duration::hours(24), chrono::Duration::zero());
        assert!(message.contains("Статистика за вчора (2024-11-27)"));
        assert!(message.contains("🥳 Електрика була увесь день!"));
    }

    #[test]
    fn test_day_stats_full_day_off() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 27).unwrap();
        let message =
            day_stats_message(date, chrono::Duration::zero(), chrono::Duration::hours(24));
        assert!(message.contains("😞 Електрика була відсутня весь день."));
    }

    #[test]
    fn test_day_stats_mixed_day() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 27).unwrap();
        let message = day_stats_message(
            date,
            chrono::Duration::hours(20),
            chrono::Duration::hours(4),
        );
        assert!(message.contains("🟢 Електрика присутня: 20 год.."));
        assert!(message.contains("🔴 Електрика відсутня: 4 год.."));
    }
}
