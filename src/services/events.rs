use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::clock::serde_time;
use crate::models::{Booking, Slot};

/// A slot changed hands. Pushed to SSE subscribers so booking widgets can
/// grey out taken times without polling.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotEvent {
    pub slot_id: Option<String>,
    pub city_id: String,
    pub date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
    pub consumed: bool,
}

impl SlotEvent {
    pub fn for_booking(booking: &Booking, consumed: bool) -> Self {
        Self {
            slot_id: booking.slot_id.clone(),
            city_id: booking.city_id.clone(),
            date: booking.date,
            start_time: booking.start_time,
            end_time: booking.end_time,
            consumed,
        }
    }

    pub fn for_slot(slot: &Slot, city_id: &str) -> Self {
        Self {
            slot_id: Some(slot.id.clone()),
            city_id: city_id.to_string(),
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            consumed: slot.is_booked,
        }
    }
}

pub fn publish(tx: &broadcast::Sender<SlotEvent>, event: SlotEvent) {
    // no subscribers is fine
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::clock::{parse_date, parse_time};

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let (tx, _) = broadcast::channel(8);
        let mut rx = tx.subscribe();
        let slot = Slot {
            id: "s1".to_string(),
            period_id: "p1".to_string(),
            date: parse_date("2025-06-01").unwrap(),
            start_time: parse_time("10:00").unwrap(),
            end_time: parse_time("11:00").unwrap(),
            is_booked: true,
        };

        publish(&tx, SlotEvent::for_slot(&slot, "moscow"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.slot_id.as_deref(), Some("s1"));
        assert!(got.consumed);

        let json = serde_json::to_value(&got).unwrap();
        assert_eq!(json["start_time"], "10:00:00");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let (tx, rx) = broadcast::channel::<SlotEvent>(8);
        drop(rx);
        let slot = Slot {
            id: "s1".to_string(),
            period_id: "p1".to_string(),
            date: parse_date("2025-06-01").unwrap(),
            start_time: parse_time("10:00").unwrap(),
            end_time: parse_time("11:00").unwrap(),
            is_booked: false,
        };
        publish(&tx, SlotEvent::for_slot(&slot, "moscow"));
    }
}
