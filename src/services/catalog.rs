use rusqlite::Connection;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::{City, Service};

pub fn create_city(conn: &Connection, name: &str, display_order: i64) -> AppResult<City> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("city name is required".to_string()));
    }
    if queries::list_cities(conn)?
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(name))
    {
        return Err(AppError::Conflict(format!("city {name} already exists")));
    }

    let city = City {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        display_order,
    };
    queries::insert_city(conn, &city)?;
    tracing::info!(city_id = %city.id, name = %city.name, "city created");
    Ok(city)
}

pub fn list_cities(conn: &Connection) -> AppResult<Vec<City>> {
    Ok(queries::list_cities(conn)?)
}

pub fn require_city(conn: &Connection, id: &str) -> AppResult<City> {
    queries::get_city(conn, id)?.ok_or_else(|| AppError::NotFound(format!("city {id}")))
}

/// Cities stay put once a period refers to them.
pub fn delete_city(conn: &Connection, id: &str) -> AppResult<()> {
    require_city(conn, id)?;
    let periods = queries::count_periods_for_city(conn, id)?;
    if periods > 0 {
        return Err(AppError::Conflict(format!(
            "city {id} is used by {periods} period(s)"
        )));
    }
    queries::delete_city(conn, id)?;
    tracing::info!(city_id = %id, "city deleted");
    Ok(())
}

pub fn create_service(conn: &Connection, name: &str) -> AppResult<Service> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("service name is required".to_string()));
    }
    let service = Service {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        is_active: true,
    };
    queries::insert_service(conn, &service)?;
    Ok(service)
}

pub fn list_services(conn: &Connection, active_only: bool) -> AppResult<Vec<Service>> {
    Ok(queries::list_services(conn, active_only)?)
}
