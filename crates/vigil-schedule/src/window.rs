use chrono::{DateTime, Datelike, Timelike, Utc};

use vigil_core::config::WINDOW_BUFFER_MINS;
use vigil_venues::{MaintenanceWindow, ScheduleType, ServiceTime, Venue};

const WEEK_MINS: i64 = 7 * 24 * 60;
const WEEK_SECS: i64 = WEEK_MINS * 60;

/// Window membership for one venue at instant `now`.
///
/// * Event venues: in window until `expires_at`.
/// * Recurring venues: in window iff some schedule entry's
///   `[start − 30 min, start + duration + 30 min]` contains `now`.
/// * A maintenance window overlapping `now` forces `false` regardless.
pub fn is_in_window(venue: &Venue, maintenance: &[MaintenanceWindow], now: DateTime<Utc>) -> bool {
    if maintenance
        .iter()
        .any(|m| m.starts_at <= now && now < m.ends_at)
    {
        return false;
    }

    match venue.schedule_type {
        ScheduleType::Event => venue.expires_at.map(|exp| now < exp).unwrap_or(false),
        ScheduleType::Recurring => {
            let now_sec = second_of_week(now);
            venue
                .service_times
                .iter()
                .any(|t| entry_contains(t, now_sec))
        }
    }
}

/// Minutes until the next scheduled service start, if any entry exists.
/// Event venues have no distinct start and return `None`.
pub fn minutes_to_next_start(venue: &Venue, now: DateTime<Utc>) -> Option<i64> {
    if venue.schedule_type == ScheduleType::Event || venue.service_times.is_empty() {
        return None;
    }
    let now_min = minute_of_week(now);
    venue
        .service_times
        .iter()
        .map(|t| {
            let start = entry_start_min(t);
            (start - now_min).rem_euclid(WEEK_MINS)
        })
        .min()
}

/// Minute-of-week in `[0, 10080)`, week starting Sunday 00:00 to match the
/// schedule's `dayOfWeek` numbering.
fn minute_of_week(at: DateTime<Utc>) -> i64 {
    let day = i64::from(at.weekday().num_days_from_sunday());
    day * 24 * 60 + i64::from(at.hour()) * 60 + i64::from(at.minute())
}

fn second_of_week(at: DateTime<Utc>) -> i64 {
    minute_of_week(at) * 60 + i64::from(at.second())
}

fn entry_start_min(t: &ServiceTime) -> i64 {
    i64::from(t.day_of_week) * 24 * 60 + i64::from(t.start_hour) * 60 + i64::from(t.start_min)
}

/// Membership test in week-modular arithmetic so windows that spill across
/// Saturday→Sunday midnight still match. Bounds are inclusive: the window
/// opens at exactly start−30:00 and closes at exactly end+30:00.
fn entry_contains(t: &ServiceTime, now_sec: i64) -> bool {
    let start = (entry_start_min(t) - WINDOW_BUFFER_MINS) * 60;
    let len = (t.duration_hours * 3600.0) as i64 + 2 * WINDOW_BUFFER_MINS * 60;
    let offset = (now_sec - start).rem_euclid(WEEK_SECS);
    offset <= len
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_core::VenueId;

    fn recurring_venue(times: Vec<ServiceTime>) -> Venue {
        Venue {
            id: VenueId::from("v-1"),
            name: "Test".into(),
            email: None,
            token: String::new(),
            registration_code: "ABCDEF".into(),
            registered_at: String::new(),
            service_times: times,
            schedule_type: ScheduleType::Recurring,
            expires_at: None,
            bot_token: None,
        }
    }

    fn sunday_service() -> Venue {
        recurring_venue(vec![ServiceTime {
            day_of_week: 0,
            start_hour: 10,
            start_min: 0,
            duration_hours: 2.0,
            label: None,
        }])
    }

    /// 2026-08-02 is a Sunday.
    fn sunday(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, h, m, s).unwrap()
    }

    #[test]
    fn window_edges_with_buffer() {
        let venue = sunday_service();
        // Buffer opens at 09:30:00 sharp.
        assert!(!is_in_window(&venue, &[], sunday(9, 29, 59)));
        assert!(is_in_window(&venue, &[], sunday(9, 30, 0)));
        // Service 10:00–12:00, buffer closes after 12:30:00 exactly.
        assert!(is_in_window(&venue, &[], sunday(12, 30, 0)));
        assert!(!is_in_window(&venue, &[], sunday(12, 30, 1)));
    }

    #[test]
    fn wrong_weekday_is_out_of_window() {
        let venue = sunday_service();
        // Monday 10:00.
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap();
        assert!(!is_in_window(&venue, &[], monday));
    }

    #[test]
    fn saturday_late_service_spills_into_sunday() {
        let venue = recurring_venue(vec![ServiceTime {
            day_of_week: 6,
            start_hour: 23,
            start_min: 0,
            duration_hours: 1.5,
            label: None,
        }]);
        // Saturday 23:00 + 1.5 h + 30 min buffer runs to Sunday 01:00.
        assert!(is_in_window(&venue, &[], sunday(0, 45, 0)));
        assert!(!is_in_window(&venue, &[], sunday(1, 10, 0)));
    }

    #[test]
    fn maintenance_overrides_service_window() {
        let venue = sunday_service();
        let maintenance = vec![MaintenanceWindow {
            id: "m-1".into(),
            venue_id: venue.id.clone(),
            starts_at: sunday(9, 0, 0),
            ends_at: sunday(11, 0, 0),
            reason: None,
        }];
        assert!(!is_in_window(&venue, &maintenance, sunday(10, 30, 0)));
        // After maintenance ends, the service window applies again.
        assert!(is_in_window(&venue, &maintenance, sunday(11, 30, 0)));
    }

    #[test]
    fn event_venue_expires() {
        let mut venue = sunday_service();
        venue.schedule_type = ScheduleType::Event;
        venue.service_times.clear();
        venue.expires_at = Some(sunday(15, 0, 0));
        assert!(is_in_window(&venue, &[], sunday(14, 59, 59)));
        assert!(!is_in_window(&venue, &[], sunday(15, 0, 0)));
    }

    #[test]
    fn event_venue_without_expiry_is_never_in_window() {
        let mut venue = sunday_service();
        venue.schedule_type = ScheduleType::Event;
        venue.expires_at = None;
        assert!(!is_in_window(&venue, &[], sunday(10, 30, 0)));
    }

    #[test]
    fn minutes_to_next_start_counts_forward() {
        let venue = sunday_service();
        assert_eq!(minutes_to_next_start(&venue, sunday(9, 30, 0)), Some(30));
        // Just past the start, the next occurrence is a week out.
        assert_eq!(
            minutes_to_next_start(&venue, sunday(10, 1, 0)),
            Some(WEEK_MINS - 1)
        );
    }

    #[test]
    fn determinism_same_inputs_same_answer() {
        let venue = sunday_service();
        let at = sunday(10, 15, 0);
        let a = is_in_window(&venue, &[], at);
        let b = is_in_window(&venue, &[], at);
        assert_eq!(a, b);
        assert!(a);
    }
}
