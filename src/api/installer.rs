//! Installer portal endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        appointment::{Appointment, BookingRequest, UpdateAppointmentStatus},
        order::{FulfillmentOrder, MarkDiyRequest, PendingOrdersQuery, PendingOrdersResponse},
    },
};

use super::AuthenticatedUser;

/// Orders in the installer's service area awaiting scheduling
#[utoipa::path(
    get,
    path = "/installer/pending-orders",
    tag = "installer",
    security(("bearer_auth" = [])),
    params(PendingOrdersQuery),
    responses(
        (status = 200, description = "Pending orders", body = PendingOrdersResponse),
        (status = 403, description = "Installer account required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_pending_orders(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<PendingOrdersQuery>,
) -> AppResult<Json<PendingOrdersResponse>> {
    let actor = claims.require_installer()?;
    let response = state
        .services
        .installer
        .pending_orders(actor.id, query.filter.unwrap_or_default(), query.search.as_deref())
        .await?;
    Ok(Json(response))
}

/// Book an appointment on the customer's behalf
#[utoipa::path(
    post,
    path = "/installer/pending-orders/{id}/schedule",
    tag = "installer",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    request_body = BookingRequest,
    responses(
        (status = 201, description = "Appointment scheduled", body = Appointment),
        (status = 409, description = "Slot full or order not schedulable", body = crate::error::ErrorResponse)
    )
)]
pub async fn schedule_order(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<BookingRequest>,
) -> AppResult<(StatusCode, Json<Appointment>)> {
    let actor = claims.require_installer()?;
    let appointment = state.services.scheduling.schedule(id, &data, &actor).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Mark an order as self-installed
#[utoipa::path(
    post,
    path = "/installer/pending-orders/{id}/mark-diy",
    tag = "installer",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    request_body = MarkDiyRequest,
    responses(
        (status = 200, description = "Order marked DIY", body = FulfillmentOrder)
    )
)]
pub async fn mark_order_diy(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<MarkDiyRequest>,
) -> AppResult<Json<FulfillmentOrder>> {
    data.validate()?;
    let actor = claims.require_installer()?;
    let order = state
        .services
        .scheduling
        .mark_diy(id, data.reason.as_deref(), &actor)
        .await?;
    Ok(Json(order))
}

/// Record the outcome of a visit
#[utoipa::path(
    patch,
    path = "/installer/appointments/{id}/status",
    tag = "installer",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = UpdateAppointmentStatus,
    responses(
        (status = 200, description = "Visit recorded", body = Appointment),
        (status = 409, description = "Appointment not active", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_appointment_status(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(data): Json<UpdateAppointmentStatus>,
) -> AppResult<Json<Appointment>> {
    data.validate()?;
    let actor = claims.actor()?;
    let appointment = state
        .services
        .scheduling
        .record_visit(id, data.status, data.notes.as_deref(), &actor)
        .await?;
    Ok(Json(appointment))
}
