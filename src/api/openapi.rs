//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{appointments, availability, health, installer, ledger, schedules};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Install Scheduler API",
        version = "0.3.0",
        description = "Delivery and installation appointment scheduling REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Availability
        availability::get_availability,
        availability::list_slots,
        // Appointments
        appointments::create_appointment,
        appointments::get_appointment,
        appointments::reschedule_appointment,
        appointments::cancel_appointment,
        // Orders
        appointments::list_order_appointments,
        appointments::order_history,
        appointments::mark_diy,
        // Installer
        installer::list_pending_orders,
        installer::schedule_order,
        installer::mark_order_diy,
        installer::update_appointment_status,
        // Admin
        schedules::list_slots,
        schedules::create_slot,
        schedules::update_slot,
        schedules::list_blackouts,
        schedules::create_blackout,
        schedules::delete_blackout,
        ledger::reconcile,
    ),
    components(
        schemas(
            // Catalog
            crate::models::schedule::TimeSlotTemplate,
            crate::models::schedule::CreateTimeSlot,
            crate::models::schedule::UpdateTimeSlot,
            crate::models::schedule::BlackoutRule,
            crate::models::schedule::CreateBlackout,
            // Availability
            crate::models::availability::DateAvailability,
            crate::models::availability::SlotAvailability,
            // Appointments
            crate::models::appointment::Appointment,
            crate::models::appointment::AppointmentStatus,
            crate::models::appointment::DeliveryLocation,
            crate::models::appointment::NotificationPrefs,
            crate::models::appointment::BookingRequest,
            crate::models::appointment::CreateAppointment,
            crate::models::appointment::RescheduleAppointment,
            crate::models::appointment::CancelAppointment,
            crate::models::appointment::VisitOutcome,
            crate::models::appointment::UpdateAppointmentStatus,
            // Orders
            crate::models::order::FulfillmentOrder,
            crate::models::order::FulfillmentStatus,
            crate::models::order::FulfillmentEvent,
            crate::models::order::FulfillmentEventKind,
            crate::models::order::PendingOrder,
            crate::models::order::PendingFilter,
            crate::models::order::PendingOrdersResponse,
            crate::models::order::MarkDiyRequest,
            // Ledger
            crate::models::ledger::SweepReport,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "availability", description = "Public slot availability"),
        (name = "appointments", description = "Booking, rescheduling and cancellation"),
        (name = "orders", description = "Order appointments and fulfillment history"),
        (name = "installer", description = "Installer work queue"),
        (name = "admin", description = "Slot catalog, blackouts and ledger maintenance")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
