use chrono::NaiveDate;

use crate::models::clock::{from_minute_of_day, minute_of_day};
use crate::models::{Booking, GeneratedSlot, Period, SlotKey};

pub const DEFAULT_SLOT_MINUTES: u32 = 60;
/// A slot never outlasts the day it starts on.
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;

/// Tiles `[work_start, work_end)` into back-to-back `[t, t + duration)`
/// minute ranges. A trailing remainder shorter than `duration` is dropped.
pub fn tile_minutes(work_start: u32, work_end: u32, duration: u32) -> Vec<(u32, u32)> {
    if duration == 0 {
        return Vec::new();
    }

    let mut tiles = Vec::new();
    let mut t = work_start;
    while let Some(end) = t.checked_add(duration).filter(|end| *end <= work_end) {
        tiles.push((t, end));
        t = end;
    }
    tiles
}

/// Slots the period offers on `date`, tagged consumed when a non-cancelled
/// booking in `bookings` covers the same date and times. Dates outside the
/// period yield nothing.
pub fn generate_slots(
    period: &Period,
    date: NaiveDate,
    duration_minutes: u32,
    bookings: &[Booking],
) -> Vec<GeneratedSlot> {
    if !period.covers(date) {
        return Vec::new();
    }

    tile_minutes(
        minute_of_day(&period.work_start),
        minute_of_day(&period.work_end),
        duration_minutes,
    )
    .into_iter()
    .filter_map(|(start, end)| {
        let start_time = from_minute_of_day(start)?;
        let end_time = from_minute_of_day(end)?;
        let consumed = bookings.iter().any(|b| {
            b.status.occupies_slot()
                && b.date == date
                && b.start_time == start_time
                && b.end_time == end_time
        });
        Some(GeneratedSlot {
            date,
            start_time,
            end_time,
            consumed,
        })
    })
    .collect()
}

/// Slot identities for one date of the period.
pub fn slot_keys_for_date(period: &Period, date: NaiveDate, duration_minutes: u32) -> Vec<SlotKey> {
    generate_slots(period, date, duration_minutes, &[])
        .into_iter()
        .map(|g| SlotKey {
            period_id: period.id.clone(),
            date: g.date,
            start_time: g.start_time,
            end_time: g.end_time,
        })
        .collect()
}

/// Whether `key` is one of the slots the period generates.
pub fn is_generated_slot(period: &Period, key: &SlotKey, duration_minutes: u32) -> bool {
    key.period_id == period.id
        && slot_keys_for_date(period, key.date, duration_minutes)
            .iter()
            .any(|k| k == key)
}
