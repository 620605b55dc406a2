use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::errors::{AppError, AppResult};
use crate::models::clock::{self, parse_date};
use crate::models::{BookingOrigin, City, ClaimOutcome, ClientInfo, Period, Service, Slot, SlotKey};
use crate::services::events::SlotEvent;
use crate::services::{availability, catalog, reconciler, schedule};
use crate::state::AppState;

/// Upper bound on slots picked in one form submission.
pub const MAX_SLOTS_PER_REQUEST: usize = 10;

// GET /api/cities
pub async fn list_cities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<City>>, AppError> {
    let db = state.conn()?;
    Ok(Json(catalog::list_cities(&db)?))
}

// GET /api/services
pub async fn list_services(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Service>>, AppError> {
    let db = state.conn()?;
    Ok(Json(catalog::list_services(&db, true)?))
}

// GET /api/cities/:city_id/periods
#[derive(Deserialize)]
pub struct PeriodsQuery {
    pub as_of: Option<String>,
}

pub async fn list_periods(
    State(state): State<Arc<AppState>>,
    Path(city_id): Path<String>,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Vec<Period>>, AppError> {
    let as_of = match query.as_of.as_deref() {
        Some(s) => parse_date(s)?,
        None => clock::local_now().date(),
    };
    let db = state.conn()?;
    catalog::require_city(&db, &city_id)?;
    Ok(Json(schedule::list_active_periods(&db, &city_id, as_of)?))
}

// GET /api/cities/:city_id/slots?date=
#[derive(Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
}

pub async fn day_slots(
    State(state): State<Arc<AppState>>,
    Path(city_id): Path<String>,
    Query(query): Query<DayQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let date = parse_date(required(query.date.as_deref(), "date")?)?;
    let mut db = state.conn()?;
    let slots = schedule::get_or_create_slots_for_date(&mut db, &city_id, date, state.config.slot_duration_minutes)?;
    Ok(Json(slots))
}

// GET /api/cities/:city_id/available?from=&to=
#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Path(city_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let from = parse_date(required(query.from.as_deref(), "from")?)?;
    let to = match query.to.as_deref() {
        Some(s) => parse_date(s)?,
        None => from,
    };
    let mut db = state.conn()?;
    let slots = availability::list_available_slots(
        &mut db,
        &city_id,
        from,
        to,
        clock::local_now(),
        state.config.slot_duration_minutes,
    )?;
    Ok(Json(slots))
}

// POST /api/bookings
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub slots: Vec<SlotKey>,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    booked: usize,
    failed: usize,
    outcomes: Vec<ClaimOutcome>,
}

pub async fn create_bookings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, AppError> {
    submit_claims(state, req, BookingOrigin::Client).await
}

/// Runs one claim per requested slot. 200 when at least one slot was
/// booked, 409 when every slot was already taken, 400 otherwise.
pub(crate) async fn submit_claims(
    state: Arc<AppState>,
    req: ClaimRequest,
    origin: BookingOrigin,
) -> Result<Response, AppError> {
    if req.slots.is_empty() {
        return Err(AppError::Validation("select at least one slot".to_string()));
    }
    if req.slots.len() > MAX_SLOTS_PER_REQUEST {
        return Err(AppError::Validation(format!(
            "at most {MAX_SLOTS_PER_REQUEST} slots per request"
        )));
    }
    let client = ClientInfo {
        name: req.name,
        phone: req.phone,
        email: req.email,
    }
    .normalized()?;
    let service_id = req.service_id.filter(|s| !s.trim().is_empty());

    let outcomes = reconciler::claim_slots(state, req.slots, client, service_id, origin).await;
    let booked = outcomes.iter().filter(|o| o.succeeded()).count();
    let failed = outcomes.len() - booked;

    let status = if booked > 0 {
        StatusCode::OK
    } else if outcomes.iter().all(|o| o.conflicted()) {
        StatusCode::CONFLICT
    } else {
        StatusCode::BAD_REQUEST
    };
    if failed > 0 {
        tracing::info!(booked, failed, "multi-slot claim partially failed");
    }

    Ok((status, Json(ClaimResponse { booked, failed, outcomes })).into_response())
}

// GET /api/slots/events
#[derive(Deserialize)]
pub struct SlotEventsQuery {
    pub city_id: Option<String>,
    /// With `city_id`, the day's current slots are sent before live events.
    pub date: Option<String>,
}

pub async fn slot_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotEventsQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state.slot_tx.subscribe();

    let snapshot: Vec<SlotEvent> = match (query.city_id.as_deref(), query.date.as_deref()) {
        (Some(city_id), Some(date)) => {
            let date = parse_date(date)?;
            let mut db = state.conn()?;
            schedule::get_or_create_slots_for_date(&mut db, city_id, date, state.config.slot_duration_minutes)?
                .iter()
                .map(|slot| SlotEvent::for_slot(slot, city_id))
                .collect()
        }
        _ => Vec::new(),
    };

    let catchup_stream = tokio_stream::iter(snapshot.into_iter().map(|event| Ok(slot_event(&event))));

    let city_filter = query.city_id;
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if city_filter.as_deref().map_or(true, |c| c == event.city_id) => {
            Some(Ok(slot_event(&event)))
        }
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "slot event subscriber lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    Ok(Sse::new(StreamExt::merge(combined, keepalive_stream)))
}

fn slot_event(event: &SlotEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().data(data).event("slot")
}

pub(crate) fn required<'a>(value: Option<&'a str>, name: &str) -> AppResult<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}
