//! Appointment records in PostgreSQL
//!
//! Each mutation updates the appointment, its order and the order history in one
//! transaction. Guards in the `WHERE` clauses turn concurrent edits into conflicts.

use async_trait::async_trait;
use chrono::NaiveTime;
use sqlx::{Pool, Postgres};

use super::{
    closing_event_kind,
    orders::{conflict_for, record_event},
    AppointmentsRepository,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        appointment::{Appointment, AppointmentDraft, AppointmentStatus},
        ledger::Reservation,
        order::{FulfillmentEventKind, FulfillmentStatus, NewFulfillmentEvent},
        user::Actor,
    },
};

#[derive(Clone)]
pub struct PgAppointmentsRepository {
    pool: Pool<Postgres>,
}

impl PgAppointmentsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentsRepository for PgAppointmentsRepository {
    async fn get(&self, id: i32) -> AppResult<Appointment> {
        sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", id)))
    }

    async fn find_active_for_order(&self, order_id: i32) -> AppResult<Option<Appointment>> {
        let row = sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointments WHERE order_id = $1 AND status = 'scheduled'",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_order(&self, order_id: i32) -> AppResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointments WHERE order_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create(
        &self,
        draft: &AppointmentDraft,
        reservation: &Reservation,
        expected: FulfillmentStatus,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE fulfillment_orders SET status = 'scheduled', updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(draft.order_id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            let err = conflict_for(&mut *tx, draft.order_id, "Order status changed while booking").await;
            tx.rollback().await?;
            return Err(err);
        }

        let details = &draft.details;
        let inserted = sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointments (
                order_id, service_date, slot_id, status, specific_time_requested,
                delivery_location, access_instructions, alternate_recipient, alternate_phone,
                customer_notes, notify_day_before, notify_day_of, notify_one_hour_before,
                hold_token
            )
            VALUES ($1, $2, $3, 'scheduled', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(draft.order_id)
        .bind(draft.service_date)
        .bind(draft.slot_id)
        .bind(details.specific_time)
        .bind(details.delivery_location.as_str())
        .bind(&details.access_instructions)
        .bind(&details.alternate_recipient)
        .bind(&details.alternate_phone)
        .bind(&details.customer_notes)
        .bind(details.notification_prefs.day_before)
        .bind(details.notification_prefs.day_of)
        .bind(details.notification_prefs.one_hour_before)
        .bind(reservation.token)
        .fetch_one(&mut *tx)
        .await;

        let appointment = match inserted {
            Ok(appointment) => appointment,
            Err(e) => {
                let err = AppError::from(e);
                tx.rollback().await?;
                if err.is_unique_violation() {
                    return Err(AppError::state_conflict(
                        draft.order_id,
                        FulfillmentStatus::Scheduled,
                        "Order already has an active appointment",
                    ));
                }
                return Err(err);
            }
        };

        let event = NewFulfillmentEvent::new(draft.order_id, FulfillmentEventKind::Scheduled)
            .appointment(appointment.id)
            .to_slot(appointment.service_date, appointment.slot_id);
        record_event(&mut *tx, &event, actor).await?;

        tx.commit().await?;
        Ok(appointment)
    }

    async fn move_to(
        &self,
        appointment: &Appointment,
        reservation: &Reservation,
        specific_time: Option<NaiveTime>,
        actor: &Actor,
    ) -> AppResult<Appointment> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments SET
                service_date = $2, slot_id = $3, hold_token = $4,
                specific_time_requested = $6, updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled' AND hold_token = $5
            RETURNING *
            "#,
        )
        .bind(appointment.id)
        .bind(reservation.service_date)
        .bind(reservation.slot_id)
        .bind(reservation.token)
        .bind(appointment.hold_token)
        .bind(specific_time)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(moved) = moved else {
            let err = conflict_for(
                &mut *tx,
                appointment.order_id,
                "Appointment changed while rescheduling",
            )
            .await;
            tx.rollback().await?;
            return Err(err);
        };

        let event = NewFulfillmentEvent::new(moved.order_id, FulfillmentEventKind::Rescheduled)
            .appointment(moved.id)
            .from_slot(appointment.service_date, appointment.slot_id)
            .to_slot(moved.service_date, moved.slot_id);
        record_event(&mut *tx, &event, actor).await?;

        tx.commit().await?;
        Ok(moved)
    }

    async fn close(
        &self,
        appointment_id: i32,
        status: AppointmentStatus,
        order_status: FulfillmentStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> AppResult<Option<Appointment>> {
        let kind = closing_event_kind(status)?;
        let cancel_reason = if status == AppointmentStatus::Cancelled { reason } else { None };

        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments SET
                status = $2, cancel_reason = COALESCE($3, cancel_reason), updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(appointment_id)
        .bind(status.as_str())
        .bind(cancel_reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(closed) = closed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let reverted = sqlx::query(
            r#"
            UPDATE fulfillment_orders SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(closed.order_id)
        .bind(order_status.as_str())
        .execute(&mut *tx)
        .await?;

        if reverted.rows_affected() == 0 {
            let err = conflict_for(&mut *tx, closed.order_id, "Order is not scheduled").await;
            tx.rollback().await?;
            return Err(err);
        }

        let event = NewFulfillmentEvent::new(closed.order_id, kind)
            .appointment(closed.id)
            .from_slot(closed.service_date, closed.slot_id)
            .reason(reason.map(str::to_string));
        record_event(&mut *tx, &event, actor).await?;

        tx.commit().await?;
        Ok(Some(closed))
    }
}
