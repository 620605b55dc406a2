use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::handlers::public::{required, submit_claims, ClaimRequest};
use crate::models::clock::{self, parse_date};
use crate::models::{
    Booking, BookingFilter, BookingOrigin, BookingStatus, City, GeneratedSlot, Period, PeriodFilter, PeriodInput,
    PeriodPatch, Service,
};
use crate::services::events::{self, SlotEvent};
use crate::services::{availability, catalog, reconciler, schedule};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

// ── Catalog ──

pub async fn list_cities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<City>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(catalog::list_cities(&db)?))
}

#[derive(Deserialize)]
pub struct CreateCityRequest {
    pub name: String,
    #[serde(default)]
    pub display_order: i64,
}

pub async fn create_city(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCityRequest>,
) -> Result<Json<City>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(catalog::create_city(&db, &req.name, req.display_order)?))
}

pub async fn delete_city(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    catalog::delete_city(&db, &id)?;
    Ok(ok())
}

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(catalog::create_service(&db, &req.name)?))
}

// ── Periods ──

#[derive(Deserialize)]
pub struct PeriodsQuery {
    pub city_id: Option<String>,
    pub active_as_of: Option<String>,
}

pub async fn list_periods(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Vec<Period>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let filter = PeriodFilter {
        city_id: query.city_id,
        active_as_of: query.active_as_of.as_deref().map(parse_date).transpose()?,
    };
    let db = state.conn()?;
    Ok(Json(schedule::list_periods(&db, &filter)?))
}

#[derive(Deserialize)]
pub struct CreatePeriodRequest {
    pub city_id: String,
    pub start_date: String,
    pub end_date: String,
    pub work_start: String,
    pub work_end: String,
}

pub async fn create_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePeriodRequest>,
) -> Result<Json<Period>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let input = PeriodInput::parse(&req.city_id, &req.start_date, &req.end_date, &req.work_start, &req.work_end)?;
    let mut db = state.conn()?;
    let period = schedule::create_period(&mut db, &input, state.config.slot_duration_minutes)?;
    Ok(Json(period))
}

pub async fn get_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Period>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(schedule::get_period(&db, &id)?))
}

pub async fn update_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<PeriodPatch>,
) -> Result<Json<Period>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let mut db = state.conn()?;
    let current = schedule::get_period(&db, &id)?;
    let input = patch.apply(&current)?;
    let period = schedule::update_period(&mut db, &id, &input, state.config.slot_duration_minutes)?;
    Ok(Json(period))
}

pub async fn delete_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let mut db = state.conn()?;
    schedule::delete_period(&mut db, &id)?;
    Ok(ok())
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    cancelled: Vec<Booking>,
}

pub async fn release_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReleaseResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let cancelled = {
        let mut db = state.conn()?;
        schedule::release_period(&mut db, &id)?
    };
    for booking in &cancelled {
        events::publish(&state.slot_tx, SlotEvent::for_booking(booking, false));
    }
    Ok(Json(ReleaseResponse { cancelled }))
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub date: Option<String>,
}

pub async fn preview_period(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<Vec<GeneratedSlot>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let date = parse_date(required(query.date.as_deref(), "date")?)?;
    let db = state.conn()?;
    Ok(Json(schedule::preview_slots(&db, &id, date, state.config.slot_duration_minutes)?))
}

// ── Bookings ──

#[derive(Deserialize)]
pub struct BookingsQuery {
    pub city_id: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub service_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            BookingStatus::parse(s).ok_or_else(|| AppError::Validation(format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let filter = BookingFilter {
        city_id: query.city_id,
        status,
        date_from: query.from.as_deref().map(parse_date).transpose()?,
        date_to: query.to.as_deref().map(parse_date).transpose()?,
        service_id: query.service_id,
        search: query.search,
        limit: query.limit,
    };

    let db = state.conn()?;
    Ok(Json(availability::list_bookings(&db, &filter)?))
}

// POST /api/admin/bookings: staff bookings start confirmed
pub async fn create_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    submit_claims(state, req, BookingOrigin::Admin).await
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(reconciler::get_booking(&db, &id)?))
}

pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let deleted = {
        let mut db = state.conn()?;
        reconciler::delete_booking(&mut db, &id)?
    };
    if deleted.status.occupies_slot() {
        events::publish(&state.slot_tx, SlotEvent::for_booking(&deleted, false));
    }
    Ok(ok())
}

pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let mut db = state.conn()?;
    Ok(Json(reconciler::confirm_booking(&mut db, &id)?))
}

pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let mut db = state.conn()?;
    Ok(Json(reconciler::complete_booking(&mut db, &id)?))
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let cancelled = {
        let mut db = state.conn()?;
        reconciler::cancel_booking(&mut db, &id)?
    };
    events::publish(&state.slot_tx, SlotEvent::for_booking(&cancelled, false));
    Ok(Json(cancelled))
}

#[derive(Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

pub async fn update_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<NotesRequest>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let db = state.conn()?;
    Ok(Json(reconciler::update_notes(&db, &id, req.notes.as_deref())?))
}

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    clinic_name: String,
    slot_duration_minutes: u32,
    upcoming_bookings: i64,
    pending_bookings: i64,
    free_slots: i64,
    active_periods: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let stats = {
        let db = state.conn()?;
        availability::schedule_stats(&db, clock::local_now())?
    };

    Ok(Json(StatusResponse {
        clinic_name: state.config.clinic_name.clone(),
        slot_duration_minutes: state.config.slot_duration_minutes,
        upcoming_bookings: stats.upcoming_bookings,
        pending_bookings: stats.pending_bookings,
        free_slots: stats.free_slots,
        active_periods: stats.active_periods,
    }))
}
