pub mod availability;
pub mod calendar;
pub mod catalog;
pub mod events;
pub mod reconciler;
pub mod schedule;
pub mod slot_generator;
