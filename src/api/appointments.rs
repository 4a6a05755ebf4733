//! Appointment and order endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        appointment::{Appointment, CancelAppointment, CreateAppointment, RescheduleAppointment},
        order::{FulfillmentEvent, FulfillmentOrder, MarkDiyRequest},
    },
};

use super::AuthenticatedUser;

/// Book an appointment for an order
#[utoipa::path(
    post,
    path = "/appointments",
    tag = "appointments",
    security(("bearer_auth" = [])),
    request_body = CreateAppointment,
    responses(
        (status = 201, description = "Appointment scheduled", body = Appointment),
        (status = 400, description = "Booking rule violated", body = crate::error::ErrorResponse),
        (status = 409, description = "Slot full or order not schedulable", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_appointment(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(data): Json<CreateAppointment>,
) -> AppResult<(StatusCode, Json<Appointment>)> {
    let actor = claims.actor()?;
    let appointment = state
        .services
        .scheduling
        .schedule(data.order_id, &data.booking, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Get appointment details
#[utoipa::path(
    get,
    path = "/appointments/{id}",
    tag = "appointments",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    responses(
        (status = 200, description = "Appointment details", body = Appointment),
        (status = 404, description = "Appointment not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_appointment(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Appointment>> {
    let actor = claims.actor()?;
    let appointment = state.services.scheduling.get_appointment(id, &actor).await?;
    Ok(Json(appointment))
}

/// Move an appointment to another date and slot
#[utoipa::path(
    patch,
    path = "/appointments/{id}",
    tag = "appointments",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = RescheduleAppointment,
    responses(
        (status = 200, description = "Appointment rescheduled", body = Appointment),
        (status = 409, description = "New slot full or appointment not active", body = crate::error::ErrorResponse)
    )
)]
pub async fn reschedule_appointment(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<RescheduleAppointment>,
) -> AppResult<Json<Appointment>> {
    let actor = claims.actor()?;
    let appointment = state.services.scheduling.reschedule(id, &data, &actor).await?;
    Ok(Json(appointment))
}

/// Cancel an appointment
#[utoipa::path(
    patch,
    path = "/appointments/{id}/cancel",
    tag = "appointments",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = CancelAppointment,
    responses(
        (status = 200, description = "Appointment cancelled", body = Appointment),
        (status = 409, description = "Appointment already completed", body = crate::error::ErrorResponse)
    )
)]
pub async fn cancel_appointment(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<CancelAppointment>,
) -> AppResult<Json<Appointment>> {
    data.validate()?;
    let actor = claims.actor()?;
    let appointment = state
        .services
        .scheduling
        .cancel(id, data.reason.as_deref(), &actor)
        .await?;
    Ok(Json(appointment))
}

/// List every appointment of an order, most recent first
#[utoipa::path(
    get,
    path = "/orders/{id}/appointments",
    tag = "orders",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order appointments", body = Vec<Appointment>)
    )
)]
pub async fn list_order_appointments(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<Appointment>>> {
    let actor = claims.actor()?;
    let appointments = state.services.scheduling.order_appointments(id, &actor).await?;
    Ok(Json(appointments))
}

/// Fulfillment history of an order
#[utoipa::path(
    get,
    path = "/orders/{id}/history",
    tag = "orders",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Fulfillment events, oldest first", body = Vec<FulfillmentEvent>)
    )
)]
pub async fn order_history(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<FulfillmentEvent>>> {
    let actor = claims.actor()?;
    let events = state.services.scheduling.order_history(id, &actor).await?;
    Ok(Json(events))
}

/// Decline professional installation
#[utoipa::path(
    post,
    path = "/orders/{id}/mark-diy",
    tag = "orders",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    request_body = MarkDiyRequest,
    responses(
        (status = 200, description = "Order marked DIY", body = FulfillmentOrder),
        (status = 409, description = "Order cannot be marked DIY", body = crate::error::ErrorResponse)
    )
)]
pub async fn mark_diy(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<MarkDiyRequest>,
) -> AppResult<Json<FulfillmentOrder>> {
    data.validate()?;
    let actor = claims.actor()?;
    let order = state
        .services
        .scheduling
        .mark_diy(id, data.reason.as_deref(), &actor)
        .await?;
    Ok(Json(order))
}
