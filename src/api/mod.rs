//! API handlers for the scheduling REST endpoints

pub mod appointments;
pub mod availability;
pub mod health;
pub mod installer;
pub mod ledger;
pub mod openapi;
pub mod schedules;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{delete, get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = UserClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Availability (public)
        .route("/availability", get(availability::get_availability))
        .route("/slots", get(availability::list_slots))
        // Appointments
        .route("/appointments", post(appointments::create_appointment))
        .route(
            "/appointments/:id",
            get(appointments::get_appointment).patch(appointments::reschedule_appointment),
        )
        .route("/appointments/:id/cancel", patch(appointments::cancel_appointment))
        // Orders
        .route("/orders/:id/appointments", get(appointments::list_order_appointments))
        .route("/orders/:id/history", get(appointments::order_history))
        .route("/orders/:id/mark-diy", post(appointments::mark_diy))
        // Installer
        .route("/installer/pending-orders", get(installer::list_pending_orders))
        .route("/installer/pending-orders/:id/schedule", post(installer::schedule_order))
        .route("/installer/pending-orders/:id/mark-diy", post(installer::mark_order_diy))
        .route("/installer/appointments/:id/status", patch(installer::update_appointment_status))
        // Administration
        .route("/admin/slots", get(schedules::list_slots).post(schedules::create_slot))
        .route("/admin/slots/:id", put(schedules::update_slot))
        .route(
            "/admin/blackouts",
            get(schedules::list_blackouts).post(schedules::create_blackout),
        )
        .route("/admin/blackouts/:id", delete(schedules::delete_blackout))
        .route("/admin/ledger/reconcile", post(ledger::reconcile))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi::create_openapi_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
}
