//! Claiming and releasing slots.
//!
//! A claim runs in one `BEGIN IMMEDIATE` transaction: the slot row is
//! ensured, flipped from free to booked with a conditional update, and the
//! booking is inserted. The partial unique index on `bookings(slot_id)`
//! rejects a second occupying booking even if the flag were bypassed.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::clock::{format_date, format_time};
use crate::models::{Booking, BookingOrigin, BookingStatus, ClaimOutcome, ClientInfo, SlotKey};
use crate::services::events::{self, SlotEvent};
use crate::services::slot_generator;
use crate::state::AppState;

pub fn claim_slot(
    conn: &mut Connection,
    key: &SlotKey,
    client: &ClientInfo,
    service_id: Option<&str>,
    origin: BookingOrigin,
    duration_minutes: u32,
) -> AppResult<Booking> {
    let client = client.normalized()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let period = queries::get_period(&tx, &key.period_id)?
        .ok_or_else(|| AppError::NotFound(format!("period {}", key.period_id)))?;
    if !slot_generator::is_generated_slot(&period, key, duration_minutes) {
        return Err(AppError::Validation(format!(
            "{} {}-{} is not a slot of period {}",
            format_date(&key.date),
            format_time(&key.start_time),
            format_time(&key.end_time),
            period.id
        )));
    }
    if let Some(service_id) = service_id {
        if !queries::service_exists(&tx, service_id)? {
            return Err(AppError::NotFound(format!("service {service_id}")));
        }
    }

    queries::insert_slot_if_absent(&tx, key)?;
    let slot = queries::get_slot_by_key(&tx, key)?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("slot row vanished inside claim")))?;
    if !queries::mark_slot_booked(&tx, &slot.id)? {
        return Err(already_booked(key));
    }

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        slot_id: Some(slot.id.clone()),
        city_id: period.city_id.clone(),
        date: key.date,
        start_time: key.start_time,
        end_time: key.end_time,
        service_id: service_id.map(str::to_string),
        client_name: client.name,
        client_phone: client.phone,
        client_email: client.email,
        status: origin.initial_status(),
        notes: None,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = queries::insert_booking(&tx, &booking) {
        if is_constraint_violation(&e) {
            return Err(already_booked(key));
        }
        return Err(e.into());
    }
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        slot_id = %slot.id,
        date = %booking.date,
        start = %format_time(&booking.start_time),
        status = %booking.status,
        "slot claimed"
    );
    Ok(booking)
}

/// Claims every key concurrently. Claims are independent: a conflict on one
/// slot leaves the others committed. Outcomes come back in request order.
pub async fn claim_slots(
    state: Arc<AppState>,
    keys: Vec<SlotKey>,
    client: ClientInfo,
    service_id: Option<String>,
    origin: BookingOrigin,
) -> Vec<ClaimOutcome> {
    let duration = state.config.slot_duration_minutes;

    let handles: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let state = Arc::clone(&state);
            let client = client.clone();
            let service_id = service_id.clone();
            let task_key = key.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let mut conn = state.conn()?;
                claim_slot(&mut conn, &task_key, &client, service_id.as_deref(), origin, duration)
            });
            (key, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(anyhow::anyhow!("claim task failed: {e}"))),
        };
        match &result {
            Ok(booking) => events::publish(&state.slot_tx, SlotEvent::for_booking(booking, true)),
            Err(e) if e.is_slot_conflict() => {
                tracing::warn!(period_id = %key.period_id, date = %key.date, "claim lost to another booking");
            }
            Err(e) => tracing::warn!(error = %e, "claim failed"),
        }
        outcomes.push(ClaimOutcome::from_result(key, result));
    }
    outcomes
}

pub fn get_booking(conn: &Connection, id: &str) -> AppResult<Booking> {
    queries::get_booking(conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

pub fn confirm_booking(conn: &mut Connection, id: &str) -> AppResult<Booking> {
    transition(conn, id, BookingStatus::Confirmed)
}

pub fn complete_booking(conn: &mut Connection, id: &str) -> AppResult<Booking> {
    transition(conn, id, BookingStatus::Completed)
}

/// Cancels and frees the slot in the same transaction.
pub fn cancel_booking(conn: &mut Connection, id: &str) -> AppResult<Booking> {
    transition(conn, id, BookingStatus::Cancelled)
}

/// Removes the booking row. A slot it still held becomes free again.
pub fn delete_booking(conn: &mut Connection, id: &str) -> AppResult<Booking> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let booking = require_booking(&tx, id)?;
    queries::delete_booking(&tx, id)?;
    if booking.status.occupies_slot() {
        if let Some(slot_id) = &booking.slot_id {
            queries::release_slot(&tx, slot_id)?;
        }
    }
    tx.commit()?;

    tracing::info!(booking_id = %id, status = %booking.status, "booking deleted");
    Ok(booking)
}

pub fn update_notes(conn: &Connection, id: &str, notes: Option<&str>) -> AppResult<Booking> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    let now = Utc::now().naive_utc();
    if !queries::update_booking_notes(conn, id, notes, &now)? {
        return Err(AppError::NotFound(format!("booking {id}")));
    }
    get_booking(conn, id)
}

fn transition(conn: &mut Connection, id: &str, next: BookingStatus) -> AppResult<Booking> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let booking = require_booking(&tx, id)?;
    if !booking.status.can_transition_to(next) {
        return Err(AppError::InvalidTransition {
            from: booking.status,
            to: next,
        });
    }

    let now = Utc::now().naive_utc();
    if !queries::update_booking_status(&tx, id, booking.status, next, &now)? {
        return Err(AppError::Conflict(format!("booking {id} changed concurrently")));
    }
    if !next.occupies_slot() {
        if let Some(slot_id) = &booking.slot_id {
            queries::release_slot(&tx, slot_id)?;
        }
    }
    tx.commit()?;

    tracing::info!(booking_id = %id, from = %booking.status, to = %next, "booking status changed");
    Ok(Booking {
        status: next,
        updated_at: now,
        ..booking
    })
}

fn require_booking(conn: &Connection, id: &str) -> AppResult<Booking> {
    queries::get_booking(conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

fn already_booked(key: &SlotKey) -> AppError {
    AppError::SlotAlreadyBooked {
        date: format_date(&key.date),
        start_time: format_time(&key.start_time),
        end_time: format_time(&key.end_time),
    }
}

fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
    )
}
