pub mod booking;
pub mod city;
pub mod clock;
pub mod period;
pub mod service;
pub mod slot;

pub use booking::{Booking, BookingFilter, BookingOrigin, BookingStatus, ClaimOutcome, ClientInfo};
pub use city::City;
pub use period::{Period, PeriodFilter, PeriodInput, PeriodPatch};
pub use service::Service;
pub use slot::{GeneratedSlot, Slot, SlotKey};
