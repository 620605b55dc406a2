use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::clock::{
    date_from_sql, datetime_from_sql, format_date, format_datetime, format_time, time_from_sql,
};
use crate::models::{
    Booking, BookingFilter, BookingStatus, City, Period, PeriodFilter, Service, Slot, SlotKey,
};

// ── Cities ──

pub fn insert_city(conn: &Connection, city: &City) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO cities (id, name, display_order) VALUES (?1, ?2, ?3)",
        params![city.id, city.name, city.display_order],
    )?;
    Ok(())
}

pub fn list_cities(conn: &Connection) -> anyhow::Result<Vec<City>> {
    let mut stmt =
        conn.prepare("SELECT id, name, display_order FROM cities ORDER BY display_order ASC, name ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(City {
            id: row.get(0)?,
            name: row.get(1)?,
            display_order: row.get(2)?,
        })
    })?;

    let mut cities = vec![];
    for row in rows {
        cities.push(row?);
    }
    Ok(cities)
}

pub fn get_city(conn: &Connection, id: &str) -> anyhow::Result<Option<City>> {
    let city = conn
        .query_row(
            "SELECT id, name, display_order FROM cities WHERE id = ?1",
            params![id],
            |row| {
                Ok(City {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_order: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(city)
}

pub fn delete_city(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM cities WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn count_periods_for_city(conn: &Connection, city_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM periods WHERE city_id = ?1",
        params![city_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ── Services ──

pub fn insert_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, name, is_active) VALUES (?1, ?2, ?3)",
        params![service.id, service.name, service.is_active],
    )?;
    Ok(())
}

pub fn list_services(conn: &Connection, active_only: bool) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, is_active FROM services WHERE (?1 = 0 OR is_active = 1) ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![active_only], |row| {
        Ok(Service {
            id: row.get(0)?,
            name: row.get(1)?,
            is_active: row.get(2)?,
        })
    })?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn service_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM services WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

// ── Periods ──

const PERIOD_COLUMNS: &str =
    "id, city_id, start_date, end_date, work_start, work_end, created_at, updated_at";

pub fn insert_period(conn: &Connection, period: &Period) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO periods (id, city_id, start_date, end_date, work_start, work_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            period.id,
            period.city_id,
            format_date(&period.start_date),
            format_date(&period.end_date),
            format_time(&period.work_start),
            format_time(&period.work_end),
            format_datetime(&period.created_at),
            format_datetime(&period.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_period(conn: &Connection, period: &Period) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE periods SET city_id = ?1, start_date = ?2, end_date = ?3, work_start = ?4, work_end = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            period.city_id,
            format_date(&period.start_date),
            format_date(&period.end_date),
            format_time(&period.work_start),
            format_time(&period.work_end),
            format_datetime(&period.updated_at),
            period.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_period(conn: &Connection, id: &str) -> anyhow::Result<Option<Period>> {
    let result = conn
        .query_row(
            &format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE id = ?1"),
            params![id],
            |row| Ok(parse_period_row(row)),
        )
        .optional()?;

    result.transpose()
}

pub fn delete_period(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM periods WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn list_periods(conn: &Connection, filter: &PeriodFilter) -> anyhow::Result<Vec<Period>> {
    let mut clauses: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(city_id) = &filter.city_id {
        clauses.push("city_id = ?");
        values.push(Box::new(city_id.clone()));
    }
    if let Some(as_of) = &filter.active_as_of {
        clauses.push("end_date >= ?");
        values.push(Box::new(format_date(as_of)));
    }

    let sql = format!(
        "SELECT {PERIOD_COLUMNS} FROM periods{} ORDER BY start_date ASC, work_start ASC",
        where_clause(&clauses)
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), |row| Ok(parse_period_row(row)))?;

    let mut periods = vec![];
    for row in rows {
        periods.push(row??);
    }
    Ok(periods)
}

pub fn periods_covering(conn: &Connection, city_id: &str, date: &NaiveDate) -> anyhow::Result<Vec<Period>> {
    let day = format_date(date);
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERIOD_COLUMNS} FROM periods
         WHERE city_id = ?1 AND start_date <= ?2 AND end_date >= ?2
         ORDER BY work_start ASC"
    ))?;
    let rows = stmt.query_map(params![city_id, day], |row| Ok(parse_period_row(row)))?;

    let mut periods = vec![];
    for row in rows {
        periods.push(row??);
    }
    Ok(periods)
}

fn parse_period_row(row: &rusqlite::Row) -> anyhow::Result<Period> {
    let start_date: String = row.get(2)?;
    let end_date: String = row.get(3)?;
    let work_start: String = row.get(4)?;
    let work_end: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(Period {
        id: row.get(0)?,
        city_id: row.get(1)?,
        start_date: date_from_sql(&start_date)?,
        end_date: date_from_sql(&end_date)?,
        work_start: time_from_sql(&work_start)?,
        work_end: time_from_sql(&work_end)?,
        created_at: datetime_from_sql(&created_at)?,
        updated_at: datetime_from_sql(&updated_at)?,
    })
}

// ── Slots ──

const SLOT_COLUMNS: &str = "s.id, s.period_id, s.slot_date, s.start_time, s.end_time, s.is_booked";

/// Inserts the slot row unless one with the same identity exists.
/// Returns whether a row was created.
pub fn insert_slot_if_absent(conn: &Connection, key: &SlotKey) -> anyhow::Result<bool> {
    let id = uuid::Uuid::new_v4().to_string();
    let count = conn.execute(
        "INSERT OR IGNORE INTO time_slots (id, period_id, slot_date, start_time, end_time, is_booked)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            id,
            key.period_id,
            format_date(&key.date),
            format_time(&key.start_time),
            format_time(&key.end_time),
        ],
    )?;
    Ok(count > 0)
}

#[cfg(test)]
pub fn get_slot(conn: &Connection, id: &str) -> anyhow::Result<Option<Slot>> {
    conn.query_row(
        &format!("SELECT {SLOT_COLUMNS} FROM time_slots s WHERE s.id = ?1"),
        params![id],
        |row| Ok(parse_slot_row(row)),
    )
    .optional()?
    .transpose()
}

pub fn get_slot_by_key(conn: &Connection, key: &SlotKey) -> anyhow::Result<Option<Slot>> {
    conn.query_row(
        &format!(
            "SELECT {SLOT_COLUMNS} FROM time_slots s
             WHERE s.period_id = ?1 AND s.slot_date = ?2 AND s.start_time = ?3 AND s.end_time = ?4"
        ),
        params![
            key.period_id,
            format_date(&key.date),
            format_time(&key.start_time),
            format_time(&key.end_time),
        ],
        |row| Ok(parse_slot_row(row)),
    )
    .optional()?
    .transpose()
}

pub fn list_slots_for_date(conn: &Connection, period_id: &str, date: &NaiveDate) -> anyhow::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots s
         WHERE s.period_id = ?1 AND s.slot_date = ?2
         ORDER BY s.start_time ASC"
    ))?;
    let rows = stmt.query_map(params![period_id, format_date(date)], |row| Ok(parse_slot_row(row)))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

#[cfg(test)]
pub fn count_slots_for_period(conn: &Connection, period_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM time_slots WHERE period_id = ?1",
        params![period_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Flips a free slot to booked. Returns false if it was already booked,
/// which is the conflict signal for a claim.
pub fn mark_slot_booked(conn: &Connection, slot_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots SET is_booked = 1 WHERE id = ?1 AND is_booked = 0",
        params![slot_id],
    )?;
    Ok(count > 0)
}

pub fn release_slot(conn: &Connection, slot_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE time_slots SET is_booked = 0 WHERE id = ?1 AND is_booked = 1",
        params![slot_id],
    )?;
    Ok(count > 0)
}

/// Removes every slot of the period not held by a pending or confirmed
/// booking. Bookings on removed slots keep their row with `slot_id` unset.
pub fn delete_unheld_slots(conn: &Connection, period_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM time_slots
         WHERE period_id = ?1
           AND id NOT IN (
               SELECT slot_id FROM bookings
               WHERE slot_id IS NOT NULL AND status IN ('pending', 'confirmed')
           )",
        params![period_id],
    )?;
    Ok(count)
}

/// Free slots of a city in `[from, to]` that start after `now`.
pub fn list_available_slots(
    conn: &Connection,
    city_id: &str,
    from: &NaiveDate,
    to: &NaiveDate,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM time_slots s
         INNER JOIN periods p ON p.id = s.period_id
         WHERE p.city_id = ?1
           AND s.slot_date >= ?2 AND s.slot_date <= ?3
           AND s.is_booked = 0
           AND (s.slot_date || ' ' || s.start_time) > ?4
         ORDER BY s.slot_date ASC, s.start_time ASC"
    ))?;
    let rows = stmt.query_map(
        params![city_id, format_date(from), format_date(to), format_datetime(now)],
        |row| Ok(parse_slot_row(row)),
    )?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

fn parse_slot_row(row: &rusqlite::Row) -> anyhow::Result<Slot> {
    let date: String = row.get(2)?;
    let start_time: String = row.get(3)?;
    let end_time: String = row.get(4)?;

    Ok(Slot {
        id: row.get(0)?,
        period_id: row.get(1)?,
        date: date_from_sql(&date)?,
        start_time: time_from_sql(&start_time)?,
        end_time: time_from_sql(&end_time)?,
        is_booked: row.get(5)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, slot_id, city_id, slot_date, start_time, end_time, service_id, \
     client_name, client_phone, client_email, status, notes, created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, slot_id, city_id, slot_date, start_time, end_time, service_id,
                               client_name, client_phone, client_email, status, notes, created_at, updated_at,
                               client_search)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            booking.id,
            booking.slot_id,
            booking.city_id,
            format_date(&booking.date),
            format_time(&booking.start_time),
            format_time(&booking.end_time),
            booking.service_id,
            booking.client_name,
            booking.client_phone,
            booking.client_email,
            booking.status.as_str(),
            booking.notes,
            format_datetime(&booking.created_at),
            format_datetime(&booking.updated_at),
            search_key(booking),
        ],
    )?;
    Ok(())
}

/// Unicode-folded haystack for `BookingFilter::search`.
fn search_key(booking: &Booking) -> String {
    format!(
        "{} {} {}",
        booking.client_name,
        booking.client_phone,
        booking.client_email.as_deref().unwrap_or("")
    )
    .to_lowercase()
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    )
    .optional()?
    .transpose()
}

/// Moves a booking to `status` only if it is still in `from`.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    status: BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![status.as_str(), format_datetime(now), id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn update_booking_notes(
    conn: &Connection,
    id: &str,
    notes: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET notes = ?1, updated_at = ?2 WHERE id = ?3",
        params![notes, format_datetime(now), id],
    )?;
    Ok(count > 0)
}

pub fn delete_booking(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> anyhow::Result<Vec<Booking>> {
    let mut clauses: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(city_id) = &filter.city_id {
        clauses.push("city_id = ?");
        values.push(Box::new(city_id.clone()));
    }
    if let Some(status) = &filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status.as_str()));
    }
    if let Some(from) = &filter.date_from {
        clauses.push("slot_date >= ?");
        values.push(Box::new(format_date(from)));
    }
    if let Some(to) = &filter.date_to {
        clauses.push("slot_date <= ?");
        values.push(Box::new(format_date(to)));
    }
    if let Some(service_id) = &filter.service_id {
        clauses.push("service_id = ?");
        values.push(Box::new(service_id.clone()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("client_search LIKE ? ESCAPE '\\'");
        values.push(Box::new(format!("%{}%", escape_like(&search.to_lowercase()))));
    }

    let mut sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings{} ORDER BY slot_date DESC, start_time DESC",
        where_clause(&clauses)
    );
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Box::new(limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Every booking, whatever its status, attached to a slot of the period.
pub fn bookings_for_period(conn: &Connection, period_id: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE slot_id IN (SELECT id FROM time_slots WHERE period_id = ?1)
         ORDER BY slot_date ASC, start_time ASC"
    ))?;
    let rows = stmt.query_map(params![period_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date: String = row.get(3)?;
    let start_time: String = row.get(4)?;
    let end_time: String = row.get(5)?;
    let status_str: String = row.get(10)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?;

    Ok(Booking {
        id: row.get(0)?,
        slot_id: row.get(1)?,
        city_id: row.get(2)?,
        date: date_from_sql(&date)?,
        start_time: time_from_sql(&start_time)?,
        end_time: time_from_sql(&end_time)?,
        service_id: row.get(6)?,
        client_name: row.get(7)?,
        client_phone: row.get(8)?,
        client_email: row.get(9)?,
        status,
        notes: row.get(11)?,
        created_at: datetime_from_sql(&created_at)?,
        updated_at: datetime_from_sql(&updated_at)?,
    })
}

// ── Dashboard ──

pub struct ScheduleStats {
    pub upcoming_bookings: i64,
    pub pending_bookings: i64,
    pub free_slots: i64,
    pub active_periods: i64,
}

pub fn get_schedule_stats(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<ScheduleStats> {
    let now_str = format_datetime(now);
    let today = format_date(&now.date());

    let upcoming_bookings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE status IN ('pending', 'confirmed') AND (slot_date || ' ' || start_time) > ?1",
        params![now_str],
        |row| row.get(0),
    )?;

    let pending_bookings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;

    let free_slots: i64 = conn.query_row(
        "SELECT COUNT(*) FROM time_slots WHERE is_booked = 0 AND (slot_date || ' ' || start_time) > ?1",
        params![now_str],
        |row| row.get(0),
    )?;

    let active_periods: i64 = conn.query_row(
        "SELECT COUNT(*) FROM periods WHERE end_date >= ?1",
        params![today],
        |row| row.get(0),
    )?;

    Ok(ScheduleStats {
        upcoming_bookings,
        pending_bookings,
        free_slots,
        active_periods,
    })
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
