//! Ledger maintenance endpoint

use axum::{extract::State, Json};

use crate::{error::AppResult, models::ledger::SweepReport};

use super::AuthenticatedUser;

/// Release orphaned holds and recount capacity counters
#[utoipa::path(
    post,
    path = "/admin/ledger/reconcile",
    tag = "admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep report", body = SweepReport)
    )
)]
pub async fn reconcile(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<SweepReport>> {
    claims.require_admin()?;
    let report = state.services.reconciliation.sweep().await?;
    Ok(Json(report))
}
