use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;

use crate::models::BookingStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("slot {date} {start_time}-{end_time} is already booked, please choose another time")]
    SlotAlreadyBooked {
        date: String,
        start_time: String,
        end_time: String,
    },

    #[error("period {period_id} has active bookings on {}", format_dates(.dates))]
    PeriodHasBookings {
        period_id: String,
        dates: Vec<NaiveDate>,
    },

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl AppError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Store(_) => "store_unavailable",
            AppError::Internal(_) => "internal",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::SlotAlreadyBooked { .. } => "slot_already_booked",
            AppError::PeriodHasBookings { .. } => "period_has_bookings",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized => "unauthorized",
        }
    }

    pub fn is_slot_conflict(&self) -> bool {
        matches!(self, AppError::SlotAlreadyBooked { .. })
    }
}

fn format_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SlotAlreadyBooked { .. } => StatusCode::CONFLICT,
            AppError::PeriodHasBookings { .. } => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        if let AppError::PeriodHasBookings { dates, .. } = &self {
            body["dates"] = serde_json::json!(dates);
        }
        (status, axum::Json(body)).into_response()
    }
}
