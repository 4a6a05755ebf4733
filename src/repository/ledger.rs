//! Booking ledger backed by PostgreSQL
//!
//! `capacity_counters` holds one row per (date, slot) that has ever been booked;
//! `capacity_holds` holds one row per consumed unit. Both are always written in
//! the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::BookingLedger;
use crate::{
    error::{AppError, AppResult},
    models::ledger::{CapacitySnapshot, Reservation},
};

#[derive(Clone)]
pub struct PgBookingLedger {
    pool: Pool<Postgres>,
}

impl PgBookingLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingLedger for PgBookingLedger {
    async fn try_reserve(&self, date: NaiveDate, slot_id: i32) -> AppResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        // Shared lock: a concurrent capacity change waits for this reservation
        let slot_name: Option<String> = sqlx::query_scalar(
            "SELECT name FROM time_slot_templates WHERE id = $1 AND is_active FOR SHARE",
        )
        .bind(slot_id)
        .fetch_optional(&mut *tx)
        .await?;
        let slot_name = slot_name.ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", slot_id)))?;

        sqlx::query(
            r#"
            INSERT INTO capacity_counters (service_date, slot_id, booked_count)
            VALUES ($1, $2, 0)
            ON CONFLICT (service_date, slot_id) DO NOTHING
            "#,
        )
        .bind(date)
        .bind(slot_id)
        .execute(&mut *tx)
        .await?;

        // Row lock + re-evaluated predicate: concurrent callers serialise here
        let taken = sqlx::query(
            r#"
            UPDATE capacity_counters c
            SET booked_count = c.booked_count + 1
            FROM time_slot_templates t
            WHERE c.service_date = $1 AND c.slot_id = $2
              AND t.id = c.slot_id
              AND c.booked_count < t.total_capacity
            "#,
        )
        .bind(date)
        .bind(slot_id)
        .execute(&mut *tx)
        .await?;

        if taken.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::SlotUnavailable(format!(
                "{} on {} is fully booked, please pick another slot",
                slot_name, date
            )));
        }

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO capacity_holds (token, service_date, slot_id, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING token, service_date, slot_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(date)
        .bind(slot_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn release(&self, reservation: &Reservation) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let held: Option<(NaiveDate, i32)> = sqlx::query_as(
            "DELETE FROM capacity_holds WHERE token = $1 RETURNING service_date, slot_id",
        )
        .bind(reservation.token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((date, slot_id)) = held else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE capacity_counters
            SET booked_count = booked_count - 1
            WHERE service_date = $1 AND slot_id = $2 AND booked_count > 0
            "#,
        )
        .bind(date)
        .bind(slot_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn peek(&self, date: NaiveDate, slot_id: i32) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            r#"
            SELECT GREATEST(t.total_capacity - COALESCE(c.booked_count, 0), 0)
            FROM time_slot_templates t
            LEFT JOIN capacity_counters c ON c.slot_id = t.id AND c.service_date = $1
            WHERE t.id = $2
            "#,
        )
        .bind(date)
        .bind(slot_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", slot_id)))
    }

    async fn booked_counts(&self, from: NaiveDate, to: NaiveDate) -> AppResult<CapacitySnapshot> {
        let rows = sqlx::query_as::<_, (NaiveDate, i32, i32)>(
            r#"
            SELECT service_date, slot_id, booked_count
            FROM capacity_counters
            WHERE service_date BETWEEN $1 AND $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn orphaned_reservations(&self, stale_before: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT h.token, h.service_date, h.slot_id, h.created_at
            FROM capacity_holds h
            WHERE NOT EXISTS (
                    SELECT 1 FROM appointments a
                    WHERE a.hold_token = h.token AND a.status <> 'cancelled'
                )
              AND (
                    h.created_at < $1
                    OR EXISTS (SELECT 1 FROM appointments a WHERE a.hold_token = h.token)
                )
            ORDER BY h.created_at
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn resync_counters(&self) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Blocks try_reserve/release until the recount is committed
        sqlx::query("LOCK TABLE capacity_counters IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO capacity_counters (service_date, slot_id, booked_count)
            SELECT service_date, slot_id, COUNT(*)::INTEGER
            FROM capacity_holds
            GROUP BY service_date, slot_id
            ON CONFLICT (service_date, slot_id) DO NOTHING
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE capacity_counters c
            SET booked_count = live.held
            FROM (
                SELECT c2.service_date, c2.slot_id, COUNT(h.token)::INTEGER AS held
                FROM capacity_counters c2
                LEFT JOIN capacity_holds h
                       ON h.service_date = c2.service_date AND h.slot_id = c2.slot_id
                GROUP BY c2.service_date, c2.slot_id
            ) live
            WHERE c.service_date = live.service_date
              AND c.slot_id = live.slot_id
              AND c.booked_count <> live.held
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.rows_affected() + updated.rows_affected())
    }
}
