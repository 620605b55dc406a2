use serde::{Deserialize, Serialize};

/// A treatment offered by the clinic; bookings may reference one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}
