//! Public availability endpoints

use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::AppResult,
    models::{
        availability::{AvailabilityQuery, DateAvailability},
        schedule::{parse_date, TimeSlotTemplate},
    },
};

/// Offerable slots per day for a date range
#[utoipa::path(
    get,
    path = "/availability",
    tag = "availability",
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "Availability per date", body = Vec<DateAvailability>),
        (status = 400, description = "Invalid range or unserviced zip code", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_availability(
    State(state): State<crate::AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<Vec<DateAvailability>>> {
    let from = parse_date(&query.from, "from")?;
    let to = parse_date(&query.to, "to")?;
    let days = state
        .services
        .availability
        .get_availability(from, to, query.zip.as_deref())
        .await?;
    Ok(Json(days))
}

/// Active slot templates in display order
#[utoipa::path(
    get,
    path = "/slots",
    tag = "availability",
    responses(
        (status = 200, description = "Slot catalog", body = Vec<TimeSlotTemplate>)
    )
)]
pub async fn list_slots(State(state): State<crate::AppState>) -> AppResult<Json<Vec<TimeSlotTemplate>>> {
    let slots = state.services.schedules.list_slots(false).await?;
    Ok(Json(slots))
}
