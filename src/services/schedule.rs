//! Working periods and the slot rows materialized from them.
//!
//! Slot rows are written in the same transaction as the period itself, and
//! again lazily on first read of a date, so a slot's id is stable from the
//! moment anyone can see it. Edits that would move or drop a slot held by a
//! pending or confirmed booking are refused with `PeriodHasBookings`; the
//! caller must cancel those bookings first (see [`release_period`]).

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, GeneratedSlot, Period, PeriodFilter, PeriodInput, Slot};
use crate::services::catalog;
use crate::services::slot_generator;

pub fn create_period(conn: &mut Connection, input: &PeriodInput, duration_minutes: u32) -> AppResult<Period> {
    input.validate()?;
    catalog::require_city(conn, &input.city_id)?;

    let now = Utc::now().naive_utc();
    let period = Period {
        id: uuid::Uuid::new_v4().to_string(),
        city_id: input.city_id.clone(),
        start_date: input.start_date,
        end_date: input.end_date,
        work_start: input.work_start,
        work_end: input.work_end,
        created_at: now,
        updated_at: now,
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    queries::insert_period(&tx, &period)?;
    let slots = materialize_period(&tx, &period, duration_minutes)?;
    tx.commit()?;

    tracing::info!(
        period_id = %period.id,
        city_id = %period.city_id,
        start = %period.start_date,
        end = %period.end_date,
        slots,
        "period created"
    );
    Ok(period)
}

pub fn update_period(
    conn: &mut Connection,
    id: &str,
    input: &PeriodInput,
    duration_minutes: u32,
) -> AppResult<Period> {
    input.validate()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = require_period(&tx, id)?;
    let city_changed = current.city_id != input.city_id;
    let hours_changed =
        current.work_start != input.work_start || current.work_end != input.work_end;
    let schedule_changed = !current.same_schedule(input);

    if !city_changed && !schedule_changed {
        return Ok(current);
    }
    if city_changed {
        catalog::require_city(&tx, &input.city_id)?;
    }

    let stranded: Vec<NaiveDate> = live_bookings(&tx, id)?
        .iter()
        .filter(|b| {
            city_changed
                || hours_changed
                || b.date < input.start_date
                || b.date > input.end_date
        })
        .map(|b| b.date)
        .collect();
    if !stranded.is_empty() {
        return Err(refuse(id, stranded, "update"));
    }

    let updated = Period {
        city_id: input.city_id.clone(),
        start_date: input.start_date,
        end_date: input.end_date,
        work_start: input.work_start,
        work_end: input.work_end,
        updated_at: Utc::now().naive_utc(),
        ..current
    };
    queries::update_period(&tx, &updated)?;

    let mut removed = 0;
    let mut created = 0;
    if schedule_changed {
        removed = queries::delete_unheld_slots(&tx, id)?;
        created = materialize_period(&tx, &updated, duration_minutes)?;
    }
    tx.commit()?;

    tracing::info!(period_id = %id, removed, created, "period updated");
    Ok(updated)
}

pub fn delete_period(conn: &mut Connection, id: &str) -> AppResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    require_period(&tx, id)?;

    let stranded: Vec<NaiveDate> = live_bookings(&tx, id)?.iter().map(|b| b.date).collect();
    if !stranded.is_empty() {
        return Err(refuse(id, stranded, "delete"));
    }

    queries::delete_period(&tx, id)?;
    tx.commit()?;

    tracing::info!(period_id = %id, "period deleted");
    Ok(())
}

/// Cancels every pending or confirmed booking of the period and frees their
/// slots, so that a following update or delete is no longer refused.
pub fn release_period(conn: &mut Connection, id: &str) -> AppResult<Vec<Booking>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    require_period(&tx, id)?;

    let now = Utc::now().naive_utc();
    let mut cancelled = Vec::new();
    for booking in live_bookings(&tx, id)? {
        if !queries::update_booking_status(&tx, &booking.id, booking.status, BookingStatus::Cancelled, &now)? {
            continue;
        }
        if let Some(slot_id) = &booking.slot_id {
            queries::release_slot(&tx, slot_id)?;
        }
        cancelled.push(Booking {
            status: BookingStatus::Cancelled,
            updated_at: now,
            ..booking
        });
    }
    tx.commit()?;

    tracing::warn!(period_id = %id, cancelled = cancelled.len(), "period released");
    Ok(cancelled)
}

pub fn get_period(conn: &Connection, id: &str) -> AppResult<Period> {
    require_period(conn, id)
}

pub fn list_periods(conn: &Connection, filter: &PeriodFilter) -> AppResult<Vec<Period>> {
    Ok(queries::list_periods(conn, filter)?)
}

/// Periods of the city still running on `as_of`.
pub fn list_active_periods(conn: &Connection, city_id: &str, as_of: NaiveDate) -> AppResult<Vec<Period>> {
    list_periods(
        conn,
        &PeriodFilter {
            city_id: Some(city_id.to_string()),
            active_as_of: Some(as_of),
        },
    )
}

/// All slots the city offers on `date`, creating the rows on first access.
pub fn get_or_create_slots_for_date(
    conn: &mut Connection,
    city_id: &str,
    date: NaiveDate,
    duration_minutes: u32,
) -> AppResult<Vec<Slot>> {
    catalog::require_city(conn, city_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut slots = Vec::new();
    for period in queries::periods_covering(&tx, city_id, &date)? {
        slots.extend(materialize_date(&tx, &period, date, duration_minutes)?);
    }
    tx.commit()?;

    slots.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.end_time.cmp(&b.end_time)));
    Ok(slots)
}

/// Generator output for one date with consumption taken from live bookings.
/// Nothing is written.
pub fn preview_slots(
    conn: &Connection,
    period_id: &str,
    date: NaiveDate,
    duration_minutes: u32,
) -> AppResult<Vec<GeneratedSlot>> {
    let period = require_period(conn, period_id)?;
    if !period.covers(date) {
        return Err(AppError::Validation(format!(
            "{date} is outside period {} ({} to {})",
            period.id, period.start_date, period.end_date
        )));
    }
    let bookings = queries::bookings_for_period(conn, period_id)?;
    Ok(slot_generator::generate_slots(&period, date, duration_minutes, &bookings))
}

/// Stored slots of (period, date). When none exist yet, the day is
/// generated and persisted first; later reads never recompute.
pub fn materialize_date(
    conn: &Connection,
    period: &Period,
    date: NaiveDate,
    duration_minutes: u32,
) -> AppResult<Vec<Slot>> {
    let existing = queries::list_slots_for_date(conn, &period.id, &date)?;
    if !existing.is_empty() || !period.covers(date) {
        return Ok(existing);
    }

    for key in slot_generator::slot_keys_for_date(period, date, duration_minutes) {
        queries::insert_slot_if_absent(conn, &key)?;
    }
    Ok(queries::list_slots_for_date(conn, &period.id, &date)?)
}

fn materialize_period(conn: &Connection, period: &Period, duration_minutes: u32) -> AppResult<usize> {
    let mut created = 0;
    for date in period.dates() {
        for key in slot_generator::slot_keys_for_date(period, date, duration_minutes) {
            if queries::insert_slot_if_absent(conn, &key)? {
                created += 1;
            }
        }
    }
    Ok(created)
}

fn require_period(conn: &Connection, id: &str) -> AppResult<Period> {
    queries::get_period(conn, id)?.ok_or_else(|| AppError::NotFound(format!("period {id}")))
}

fn live_bookings(conn: &Connection, period_id: &str) -> AppResult<Vec<Booking>> {
    Ok(queries::bookings_for_period(conn, period_id)?
        .into_iter()
        .filter(|b| b.status.is_live())
        .collect())
}

fn refuse(period_id: &str, mut dates: Vec<NaiveDate>, action: &str) -> AppError {
    dates.sort();
    dates.dedup();
    tracing::warn!(period_id = %period_id, action, dates = dates.len(), "refusing destructive period change");
    AppError::PeriodHasBookings {
        period_id: period_id.to_string(),
        dates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::clock::{parse_date, parse_time};
    use crate::models::{BookingOrigin, ClientInfo, SlotKey};
    use crate::services::reconciler;

    fn setup() -> (Connection, String) {
        let conn = db::init_db(":memory:").unwrap();
        let city = catalog::create_city(&conn, "Moscow", 1).unwrap();
        (conn, city.id)
    }

    fn input(city: &str, start: &str, end: &str, from: &str, to: &str) -> PeriodInput {
        PeriodInput::parse(city, start, end, from, to).unwrap()
    }

    fn client() -> ClientInfo {
        ClientInfo {
            name: "Ivan".to_string(),
            phone: "+79001234567".to_string(),
            email: Some("a@b.com".to_string()),
        }
    }

    fn key(period_id: &str, date: &str, start: &str, end: &str) -> SlotKey {
        SlotKey {
            period_id: period_id.to_string(),
            date: parse_date(date).unwrap(),
            start_time: parse_time(start).unwrap(),
            end_time: parse_time(end).unwrap(),
        }
    }

    fn slot_count(conn: &Connection, period_id: &str) -> i64 {
        queries::count_slots_for_period(conn, period_id).unwrap()
    }

    #[test]
    fn test_create_period_materializes_every_day() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-03", "10:00", "13:30"), 60).unwrap();
        assert_eq!(slot_count(&conn, &period.id), 9);
    }

    #[test]
    fn test_invalid_period_persists_nothing() {
        let (mut conn, city) = setup();
        let backwards = PeriodInput {
            city_id: city.clone(),
            start_date: parse_date("2025-06-02").unwrap(),
            end_date: parse_date("2025-06-01").unwrap(),
            work_start: parse_time("10:00").unwrap(),
            work_end: parse_time("12:00").unwrap(),
        };
        assert!(matches!(create_period(&mut conn, &backwards, 60), Err(AppError::Validation(_))));

        let empty_hours = PeriodInput {
            start_date: parse_date("2025-06-01").unwrap(),
            work_end: parse_time("10:00").unwrap(),
            ..backwards
        };
        assert!(matches!(create_period(&mut conn, &empty_hours, 60), Err(AppError::Validation(_))));

        assert!(list_periods(&conn, &PeriodFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_city_rejected() {
        let (mut conn, _) = setup();
        let err = create_period(&mut conn, &input("nowhere", "2025-06-01", "2025-06-01", "10:00", "12:00"), 60)
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (mut conn, city) = setup();
        create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-01", "10:00", "12:00"), 60).unwrap();
        let date = parse_date("2025-06-01").unwrap();

        let first = get_or_create_slots_for_date(&mut conn, &city, date, 60).unwrap();
        let second = get_or_create_slots_for_date(&mut conn, &city, date, 60).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_lazy_materialization_of_missing_day() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-01", "10:00", "12:00"), 60).unwrap();
        conn.execute("DELETE FROM time_slots", []).unwrap();

        let slots = get_or_create_slots_for_date(&mut conn, &city, parse_date("2025-06-01").unwrap(), 60).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slot_count(&conn, &period.id), 2);

        let outside = get_or_create_slots_for_date(&mut conn, &city, parse_date("2025-06-02").unwrap(), 60).unwrap();
        assert!(outside.is_empty());
    }

    #[test]
    fn test_update_regenerates_slots() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-02", "10:00", "12:00"), 60).unwrap();
        assert_eq!(slot_count(&conn, &period.id), 4);

        update_period(&mut conn, &period.id, &input(&city, "2025-06-01", "2025-06-03", "09:00", "12:00"), 60).unwrap();
        assert_eq!(slot_count(&conn, &period.id), 9);

        let slots = get_or_create_slots_for_date(&mut conn, &city, parse_date("2025-06-03").unwrap(), 60).unwrap();
        assert_eq!(slots[0].start_time, parse_time("09:00").unwrap());
    }

    #[test]
    fn test_update_refused_when_hours_change_under_a_booking() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-02", "10:00", "12:00"), 60).unwrap();
        reconciler::claim_slot(&mut conn, &key(&period.id, "2025-06-02", "10:00", "11:00"), &client(), None, BookingOrigin::Client, 60)
            .unwrap();

        let err = update_period(&mut conn, &period.id, &input(&city, "2025-06-01", "2025-06-02", "10:30", "12:30"), 60)
            .unwrap_err();
        match err {
            AppError::PeriodHasBookings { dates, .. } => assert_eq!(dates, vec![parse_date("2025-06-02").unwrap()]),
            other => panic!("unexpected error: {other}"),
        }

        // nothing changed
        let stored = get_period(&conn, &period.id).unwrap();
        assert_eq!(stored.work_start, parse_time("10:00").unwrap());
        assert_eq!(slot_count(&conn, &period.id), 4);
    }

    #[test]
    fn test_range_change_keeps_booked_slot_identity() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-02", "10:00", "12:00"), 60).unwrap();
        let booking = reconciler::claim_slot(
            &mut conn,
            &key(&period.id, "2025-06-01", "10:00", "11:00"),
            &client(),
            None,
            BookingOrigin::Client,
            60,
        )
        .unwrap();

        update_period(&mut conn, &period.id, &input(&city, "2025-06-01", "2025-06-05", "10:00", "12:00"), 60).unwrap();
        assert_eq!(slot_count(&conn, &period.id), 10);

        let slot = queries::get_slot(&conn, booking.slot_id.as_deref().unwrap()).unwrap().unwrap();
        assert!(slot.is_booked);

        // shrinking away the booked day is refused
        let err = update_period(&mut conn, &period.id, &input(&city, "2025-06-02", "2025-06-05", "10:00", "12:00"), 60)
            .unwrap_err();
        assert!(matches!(err, AppError::PeriodHasBookings { .. }));
    }

    #[test]
    fn test_delete_refused_until_released() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-01", "10:00", "12:00"), 60).unwrap();
        let booking = reconciler::claim_slot(
            &mut conn,
            &key(&period.id, "2025-06-01", "11:00", "12:00"),
            &client(),
            None,
            BookingOrigin::Admin,
            60,
        )
        .unwrap();

        assert!(matches!(delete_period(&mut conn, &period.id), Err(AppError::PeriodHasBookings { .. })));

        let released = release_period(&mut conn, &period.id).unwrap();
        assert_eq!(released.len(), 1);
        delete_period(&mut conn, &period.id).unwrap();

        assert_eq!(slot_count(&conn, &period.id), 0);
        let kept = queries::get_booking(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(kept.status, BookingStatus::Cancelled);
        assert_eq!(kept.slot_id, None);
        assert!(matches!(delete_period(&mut conn, &period.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_completed_bookings_do_not_block_edits() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-01", "10:00", "12:00"), 60).unwrap();
        let booking = reconciler::claim_slot(
            &mut conn,
            &key(&period.id, "2025-06-01", "10:00", "11:00"),
            &client(),
            None,
            BookingOrigin::Admin,
            60,
        )
        .unwrap();
        reconciler::complete_booking(&mut conn, &booking.id).unwrap();

        update_period(&mut conn, &period.id, &input(&city, "2025-06-01", "2025-06-01", "09:00", "12:00"), 60).unwrap();
        assert_eq!(slot_count(&conn, &period.id), 3);

        let kept = queries::get_booking(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(kept.status, BookingStatus::Completed);
        assert_eq!(kept.slot_id, None);
    }

    #[test]
    fn test_list_active_periods() {
        let (mut conn, city) = setup();
        create_period(&mut conn, &input(&city, "2025-07-01", "2025-07-31", "10:00", "12:00"), 60).unwrap();
        create_period(&mut conn, &input(&city, "2025-05-01", "2025-05-31", "10:00", "12:00"), 60).unwrap();
        create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-10", "10:00", "12:00"), 60).unwrap();

        let active = list_active_periods(&conn, &city, parse_date("2025-06-10").unwrap()).unwrap();
        let starts: Vec<_> = active.iter().map(|p| p.start_date.to_string()).collect();
        assert_eq!(starts, vec!["2025-06-01", "2025-07-01"]);

        let all = list_periods(&conn, &PeriodFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].start_date, parse_date("2025-05-01").unwrap());
    }

    #[test]
    fn test_preview_tags_consumed_slots() {
        let (mut conn, city) = setup();
        let period = create_period(&mut conn, &input(&city, "2025-06-01", "2025-06-01", "10:00", "12:00"), 60).unwrap();
        reconciler::claim_slot(&mut conn, &key(&period.id, "2025-06-01", "11:00", "12:00"), &client(), None, BookingOrigin::Client, 60)
            .unwrap();

        let preview = preview_slots(&conn, &period.id, parse_date("2025-06-01").unwrap(), 60).unwrap();
        let consumed: Vec<_> = preview.iter().map(|s| s.consumed).collect();
        assert_eq!(consumed, vec![false, true]);

        assert!(preview_slots(&conn, &period.id, parse_date("2025-06-02").unwrap(), 60).is_err());
    }
}
