use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::clock::serde_time;

/// A materialized, bookable unit of time owned by one period.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Slot {
    pub id: String,
    pub period_id: String,
    pub date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
    pub is_booked: bool,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// The identity a claim targets: a slot is unique per
/// (period, date, start, end) whether or not its row exists yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub period_id: String,
    pub date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
}

/// Generator output for one day, before persistence.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeneratedSlot {
    pub date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
    pub consumed: bool,
}
