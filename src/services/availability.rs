use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries::{self, ScheduleStats};
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingFilter, Slot};
use crate::services::{catalog, schedule};

/// Widest window a single availability query may cover.
pub const MAX_RANGE_DAYS: i64 = 62;

const DEFAULT_BOOKING_LIMIT: i64 = 50;
const MAX_BOOKING_LIMIT: i64 = 500;

/// Free slots of the city between `from` and `to` (inclusive) that start
/// after `now`. Days in the window are materialized first.
pub fn list_available_slots(
    conn: &mut Connection,
    city_id: &str,
    from: NaiveDate,
    to: NaiveDate,
    now: NaiveDateTime,
    duration_minutes: u32,
) -> AppResult<Vec<Slot>> {
    if from > to {
        return Err(AppError::Validation(format!("from {from} is after to {to}")));
    }
    let days = (to - from).num_days() + 1;
    if days > MAX_RANGE_DAYS {
        return Err(AppError::Validation(format!(
            "range spans {days} days, at most {MAX_RANGE_DAYS} allowed"
        )));
    }
    catalog::require_city(conn, city_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for date in from.iter_days().take_while(|d| *d <= to) {
        for period in queries::periods_covering(&tx, city_id, &date)? {
            schedule::materialize_date(&tx, &period, date, duration_minutes)?;
        }
    }
    let slots = queries::list_available_slots(&tx, city_id, &from, &to, &now)?;
    tx.commit()?;

    Ok(slots)
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> AppResult<Vec<Booking>> {
    if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
        if from > to {
            return Err(AppError::Validation(format!("date_from {from} is after date_to {to}")));
        }
    }
    let filter = BookingFilter {
        limit: Some(
            filter
                .limit
                .unwrap_or(DEFAULT_BOOKING_LIMIT)
                .clamp(1, MAX_BOOKING_LIMIT),
        ),
        ..filter.clone()
    };
    Ok(queries::list_bookings(conn, &filter)?)
}

pub fn schedule_stats(conn: &Connection, now: NaiveDateTime) -> AppResult<ScheduleStats> {
    Ok(queries::get_schedule_stats(conn, &now)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::clock::{parse_date, parse_time};
    use crate::models::{BookingOrigin, BookingStatus, ClientInfo, PeriodInput, SlotKey};
    use crate::services::reconciler;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn setup() -> (Connection, String, String) {
        let mut conn = db::init_db(":memory:").unwrap();
        let city = catalog::create_city(&conn, "Moscow", 1).unwrap();
        let input = PeriodInput::parse(&city.id, "2025-06-01", "2025-06-02", "10:00", "12:00").unwrap();
        let period = schedule::create_period(&mut conn, &input, 60).unwrap();
        (conn, city.id, period.id)
    }

    fn client(name: &str, phone: &str) -> ClientInfo {
        ClientInfo {
            name: name.to_string(),
            phone: phone.to_string(),
            email: None,
        }
    }

    fn claim(conn: &mut Connection, period_id: &str, date: &str, start: &str, end: &str, who: &ClientInfo) -> Booking {
        let key = SlotKey {
            period_id: period_id.to_string(),
            date: parse_date(date).unwrap(),
            start_time: parse_time(start).unwrap(),
            end_time: parse_time(end).unwrap(),
        };
        reconciler::claim_slot(conn, &key, who, None, BookingOrigin::Client, 60).unwrap()
    }

    #[test]
    fn test_available_excludes_booked_and_past() {
        let (mut conn, city, period) = setup();
        claim(&mut conn, &period, "2025-06-02", "10:00", "11:00", &client("Ivan", "+7900"));

        let from = parse_date("2025-06-01").unwrap();
        let to = parse_date("2025-06-02").unwrap();
        let slots = list_available_slots(&mut conn, &city, from, to, dt("2025-06-01 10:30"), 60).unwrap();

        let starts: Vec<_> = slots.iter().map(|s| s.starts_at()).collect();
        assert_eq!(
            starts,
            vec![dt("2025-06-01 11:00"), dt("2025-06-02 11:00")]
        );
    }

    #[test]
    fn test_available_range_checks() {
        let (mut conn, city, _) = setup();
        let now = dt("2025-01-01 00:00");

        let backwards = list_available_slots(&mut conn, &city, parse_date("2025-06-02").unwrap(), parse_date("2025-06-01").unwrap(), now, 60);
        assert!(matches!(backwards, Err(AppError::Validation(_))));

        let too_wide = list_available_slots(&mut conn, &city, parse_date("2025-06-01").unwrap(), parse_date("2025-08-15").unwrap(), now, 60);
        assert!(matches!(too_wide, Err(AppError::Validation(_))));

        let unknown = list_available_slots(&mut conn, "nowhere", parse_date("2025-06-01").unwrap(), parse_date("2025-06-01").unwrap(), now, 60);
        assert!(matches!(unknown, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_available_materializes_missing_days() {
        let (mut conn, city, period) = setup();
        conn.execute("DELETE FROM time_slots", []).unwrap();

        let from = parse_date("2025-06-01").unwrap();
        let slots = list_available_slots(&mut conn, &city, from, from, dt("2025-01-01 00:00"), 60).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(queries::count_slots_for_period(&conn, &period).unwrap(), 2);
    }

    #[test]
    fn test_list_bookings_filters() {
        let (mut conn, _, period) = setup();
        let ivan = client("Ivan Petrov", "+79001112233");
        let anna = client("Anna_Smirnova", "+79004445566");
        claim(&mut conn, &period, "2025-06-01", "10:00", "11:00", &ivan);
        let second = claim(&mut conn, &period, "2025-06-02", "11:00", "12:00", &anna);
        reconciler::cancel_booking(&mut conn, &second.id).unwrap();

        let all = list_bookings(&conn, &BookingFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);

        let cancelled = list_bookings(
            &conn,
            &BookingFilter {
                status: Some(BookingStatus::Cancelled),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cancelled.len(), 1);

        let by_name = list_bookings(
            &conn,
            &BookingFilter {
                search: Some("petrov".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].client_name, "Ivan Petrov");

        // underscore is literal, not a wildcard
        let literal = list_bookings(
            &conn,
            &BookingFilter {
                search: Some("a_S".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(literal.len(), 1);
        let wildcard = list_bookings(
            &conn,
            &BookingFilter {
                search: Some("n_P".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(wildcard.is_empty());

        let first_day = list_bookings(
            &conn,
            &BookingFilter {
                date_from: Some(parse_date("2025-06-01").unwrap()),
                date_to: Some(parse_date("2025-06-01").unwrap()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(first_day.len(), 1);
    }

    #[test]
    fn test_search_folds_cyrillic_case() {
        let (mut conn, _, period) = setup();
        claim(&mut conn, &period, "2025-06-01", "10:00", "11:00", &client("Иван Петров", "+79001112233"));
        claim(&mut conn, &period, "2025-06-01", "11:00", "12:00", &client("Анна", "+79004445566"));

        for needle in ["иван", "ПЕТРОВ", "Иван П"] {
            let found = list_bookings(
                &conn,
                &BookingFilter {
                    search: Some(needle.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(found.len(), 1, "search {needle:?}");
            assert_eq!(found[0].client_name, "Иван Петров");
        }
    }

    #[test]
    fn test_schedule_stats() {
        let (mut conn, _, period) = setup();
        claim(&mut conn, &period, "2025-06-01", "10:00", "11:00", &client("Ivan", "+7900"));

        let stats = schedule_stats(&conn, dt("2025-05-31 12:00")).unwrap();
        assert_eq!(stats.upcoming_bookings, 1);
        assert_eq!(stats.pending_bookings, 1);
        assert_eq!(stats.free_slots, 3);
        assert_eq!(stats.active_periods, 1);

        let later = schedule_stats(&conn, dt("2025-07-01 00:00")).unwrap();
        assert_eq!(later.upcoming_bookings, 0);
        assert_eq!(later.active_periods, 0);
    }
}
