//! Fulfillment orders, installer zip coverage and order history

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{FromRow, PgConnection, Pool, Postgres, Row};

use super::OrdersRepository;
use crate::{
    error::{AppError, AppResult},
    models::{
        order::{
            FulfillmentEvent, FulfillmentOrder, FulfillmentStatus, NewFulfillmentEvent, PendingFilter,
            PendingOrder,
        },
        user::Actor,
    },
};

#[derive(Clone)]
pub struct PgOrdersRepository {
    pool: Pool<Postgres>,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Append a history entry inside the caller's transaction
pub(super) async fn record_event(
    conn: &mut PgConnection,
    event: &NewFulfillmentEvent,
    actor: &Actor,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO fulfillment_events (
            order_id, appointment_id, kind, old_date, old_slot_id, new_date, new_slot_id,
            reason, actor_role, actor_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.order_id)
    .bind(event.appointment_id)
    .bind(event.kind.as_str())
    .bind(event.old_date)
    .bind(event.old_slot_id)
    .bind(event.new_date)
    .bind(event.new_slot_id)
    .bind(&event.reason)
    .bind(actor.role.as_str())
    .bind(actor.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Conflict error carrying the order's status as it is now
pub(super) async fn conflict_for(
    conn: &mut PgConnection,
    order_id: i32,
    message: &str,
) -> AppError {
    let current: Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM fulfillment_orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(conn)
            .await;

    match current {
        Ok(Some(status)) => match status.parse::<FulfillmentStatus>() {
            Ok(status) => AppError::state_conflict(order_id, status, message),
            Err(e) => e,
        },
        Ok(None) => AppError::NotFound(format!("Order {} not found", order_id)),
        Err(e) => e.into(),
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn get(&self, id: i32) -> AppResult<FulfillmentOrder> {
        sqlx::query_as::<_, FulfillmentOrder>("SELECT * FROM fulfillment_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))
    }

    async fn transition(
        &self,
        id: i32,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
        event: NewFulfillmentEvent,
        actor: &Actor,
    ) -> AppResult<FulfillmentOrder> {
        let mut tx = self.pool.begin().await?;

        // Entering diy also flags the order and keeps the reason
        let order = sqlx::query_as::<_, FulfillmentOrder>(
            r#"
            UPDATE fulfillment_orders SET
                status = $3,
                diy_flagged = diy_flagged OR $3 = 'diy',
                diy_reason = CASE WHEN $3 = 'diy' THEN $4 ELSE diy_reason END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&event.reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order) = order else {
            let err = conflict_for(&mut *tx, id, &format!("Order is no longer {}", from)).await;
            tx.rollback().await?;
            return Err(err);
        };

        record_event(&mut *tx, &event, actor).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn history(&self, order_id: i32) -> AppResult<Vec<FulfillmentEvent>> {
        let rows = sqlx::query_as::<_, FulfillmentEvent>(
            "SELECT * FROM fulfillment_events WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn installer_zip_codes(&self, installer_id: i32) -> AppResult<Vec<String>> {
        let zips = sqlx::query_scalar::<_, String>(
            "SELECT zip_code FROM installer_zip_codes WHERE installer_id = $1 ORDER BY zip_code",
        )
        .bind(installer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(zips)
    }

    async fn is_zip_serviced(&self, zip: &str) -> AppResult<bool> {
        let serviced: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM installer_zip_codes WHERE zip_code = $1)",
        )
        .bind(zip)
        .fetch_one(&self.pool)
        .await?;
        Ok(serviced)
    }

    async fn list_pending(
        &self,
        zip_codes: &[String],
        filter: PendingFilter,
        search: Option<&str>,
        ready_by: NaiveDate,
    ) -> AppResult<Vec<PendingOrder>> {
        if zip_codes.is_empty() {
            return Ok(Vec::new());
        }

        let statuses: Vec<&str> = filter.statuses().iter().map(|s| s.as_str()).collect();
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));

        let rows = sqlx::query(
            r#"
            SELECT o.*,
                   EXISTS(
                       SELECT 1 FROM appointments a
                       WHERE a.order_id = o.id AND a.status = 'scheduled'
                   ) AS has_appointment
            FROM fulfillment_orders o
            WHERE o.service_zip_code = ANY($1)
              AND o.status = ANY($2)
              AND o.ready_for_installation_date <= $3
              AND (
                    $4::TEXT IS NULL
                    OR o.order_number ILIKE $4
                    OR o.customer_name ILIKE $4
                    OR COALESCE(o.customer_email, '') ILIKE $4
                    OR COALESCE(o.customer_phone, '') ILIKE $4
                  )
            ORDER BY o.ready_for_installation_date, o.id
            "#,
        )
        .bind(zip_codes)
        .bind(&statuses)
        .bind(ready_by)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let has_appointment: bool = row.try_get("has_appointment")?;
            if filter == PendingFilter::Pending && has_appointment {
                continue;
            }
            result.push(PendingOrder {
                order: FulfillmentOrder::from_row(&row)?,
                has_appointment,
            });
        }
        Ok(result)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
