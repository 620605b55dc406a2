use std::env;

use crate::services::slot_generator::{DEFAULT_SLOT_MINUTES, MAX_SLOT_MINUTES};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub clinic_name: String,
    pub slot_duration_minutes: u32,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "clinic.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            clinic_name: env::var("CLINIC_NAME").unwrap_or_else(|_| "Clinic".to_string()),
            slot_duration_minutes: parse_slot_minutes(env::var("SLOT_DURATION_MINUTES").ok().as_deref()),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Out-of-range or unparsable values fall back to the default.
fn parse_slot_minutes(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse().ok())
        .filter(|m| (1..=MAX_SLOT_MINUTES).contains(m))
        .unwrap_or(DEFAULT_SLOT_MINUTES)
}
