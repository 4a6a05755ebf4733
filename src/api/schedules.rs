//! Slot catalog and blackout administration endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::schedule::{
        BlackoutQuery, BlackoutRule, CreateBlackout, CreateTimeSlot, SlotListQuery, TimeSlotTemplate,
        UpdateTimeSlot,
    },
};

use super::AuthenticatedUser;

// ---- Slots ----

/// List slot templates
#[utoipa::path(
    get,
    path = "/admin/slots",
    tag = "admin",
    security(("bearer_auth" = [])),
    params(SlotListQuery),
    responses(
        (status = 200, description = "Slot templates", body = Vec<TimeSlotTemplate>)
    )
)]
pub async fn list_slots(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<SlotListQuery>,
) -> AppResult<Json<Vec<TimeSlotTemplate>>> {
    claims.require_admin()?;
    let slots = state
        .services
        .schedules
        .list_slots(query.include_inactive.unwrap_or(false))
        .await?;
    Ok(Json(slots))
}

/// Create a slot template
#[utoipa::path(
    post,
    path = "/admin/slots",
    tag = "admin",
    security(("bearer_auth" = [])),
    request_body = CreateTimeSlot,
    responses(
        (status = 201, description = "Slot created", body = TimeSlotTemplate),
        (status = 400, description = "Invalid slot", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_slot(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(data): Json<CreateTimeSlot>,
) -> AppResult<(StatusCode, Json<TimeSlotTemplate>)> {
    claims.require_admin()?;
    let slot = state.services.schedules.create_slot(&data).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// Update a slot template
#[utoipa::path(
    put,
    path = "/admin/slots/{id}",
    tag = "admin",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Slot ID")),
    request_body = UpdateTimeSlot,
    responses(
        (status = 200, description = "Slot updated", body = TimeSlotTemplate),
        (status = 404, description = "Slot not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_slot(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<UpdateTimeSlot>,
) -> AppResult<Json<TimeSlotTemplate>> {
    claims.require_admin()?;
    let slot = state.services.schedules.update_slot(id, &data).await?;
    Ok(Json(slot))
}

// ---- Blackouts ----

/// List blackout rules
#[utoipa::path(
    get,
    path = "/admin/blackouts",
    tag = "admin",
    security(("bearer_auth" = [])),
    params(BlackoutQuery),
    responses(
        (status = 200, description = "Blackout rules", body = Vec<BlackoutRule>)
    )
)]
pub async fn list_blackouts(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<BlackoutQuery>,
) -> AppResult<Json<Vec<BlackoutRule>>> {
    claims.require_admin()?;
    let rules = state.services.schedules.list_blackouts(&query).await?;
    Ok(Json(rules))
}

/// Create a blackout rule
#[utoipa::path(
    post,
    path = "/admin/blackouts",
    tag = "admin",
    security(("bearer_auth" = [])),
    request_body = CreateBlackout,
    responses(
        (status = 201, description = "Blackout created", body = BlackoutRule)
    )
)]
pub async fn create_blackout(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(data): Json<CreateBlackout>,
) -> AppResult<(StatusCode, Json<BlackoutRule>)> {
    claims.require_admin()?;
    let rule = state.services.schedules.create_blackout(&data).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Delete a blackout rule
#[utoipa::path(
    delete,
    path = "/admin/blackouts/{id}",
    tag = "admin",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Blackout ID")),
    responses(
        (status = 204, description = "Blackout deleted")
    )
)]
pub async fn delete_blackout(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_admin()?;
    state.services.schedules.delete_blackout(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
