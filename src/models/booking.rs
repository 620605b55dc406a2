use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::clock::{serde_datetime, serde_time};
use super::slot::SlotKey;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: String,
    /// Unset once the slot row is regenerated away, which only happens to
    /// cancelled or completed bookings.
    pub slot_id: Option<String>,
    pub city_id: String,
    pub date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
    pub service_id: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: Option<String>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    #[serde(serialize_with = "serde_datetime::serialize")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serde_datetime::serialize")]
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    /// Whether a booking in this status holds its slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// Pending or confirmed: the appointment is still ahead and must not be
    /// dropped by schedule edits.
    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is claiming; decides the initial status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOrigin {
    /// Public booking widget: waits for the clinic to confirm.
    Client,
    /// Entered by staff: confirmed immediately.
    Admin,
}

impl BookingOrigin {
    pub fn initial_status(&self) -> BookingStatus {
        match self {
            BookingOrigin::Client => BookingStatus::Pending,
            BookingOrigin::Admin => BookingStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl ClientInfo {
    /// Trims fields and rejects missing name or phone and malformed email.
    pub fn normalized(&self) -> AppResult<ClientInfo> {
        let name = self.name.trim().to_string();
        let phone = self.phone.trim().to_string();
        let email = self
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        if name.is_empty() {
            return Err(AppError::Validation("client name is required".to_string()));
        }
        if phone.is_empty() {
            return Err(AppError::Validation("client phone is required".to_string()));
        }
        if let Some(e) = &email {
            if !e.contains('@') {
                return Err(AppError::Validation(format!("invalid email: {e}")));
            }
        }

        Ok(ClientInfo { name, phone, email })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub city_id: Option<String>,
    pub status: Option<BookingStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub service_id: Option<String>,
    /// Case-insensitive substring over client name, phone and email. Case is
    /// folded with Unicode rules, so Cyrillic names match too.
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// Result of one slot within a multi-slot submission.
#[derive(Debug, Serialize)]
pub struct ClaimOutcome {
    pub slot: SlotKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ClaimOutcome {
    pub fn from_result(slot: SlotKey, result: AppResult<Booking>) -> Self {
        match result {
            Ok(booking) => Self {
                slot,
                booking_id: Some(booking.id),
                error: None,
                code: None,
            },
            Err(e) => Self {
                slot,
                booking_id: None,
                code: Some(e.code()),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.booking_id.is_some()
    }

    pub fn conflicted(&self) -> bool {
        self.code == Some("slot_already_booked")
    }
}
