//! Slot templates and blackout rules in PostgreSQL

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Pool, Postgres};

use super::{capacity_below_bookings, CatalogRepository};
use crate::{
    error::{AppError, AppResult},
    models::schedule::{BlackoutDraft, BlackoutRule, TimeSlotDraft, TimeSlotTemplate},
};

#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: Pool<Postgres>,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    // ---- Slots ----

    /// List slot templates in display order
    async fn list_slots(&self, include_inactive: bool) -> AppResult<Vec<TimeSlotTemplate>> {
        let rows = sqlx::query_as::<_, TimeSlotTemplate>(
            r#"
            SELECT * FROM time_slot_templates
            WHERE is_active OR $1
            ORDER BY display_order, start_time
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_slot(&self, id: i32) -> AppResult<TimeSlotTemplate> {
        sqlx::query_as::<_, TimeSlotTemplate>("SELECT * FROM time_slot_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Time slot {} not found", id)))
    }

    async fn create_slot(&self, draft: &TimeSlotDraft) -> AppResult<TimeSlotTemplate> {
        let row = sqlx::query_as::<_, TimeSlotTemplate>(
            r#"
            INSERT INTO time_slot_templates (
                name, code, start_time, end_time, total_capacity, additional_fee,
                requires_signature, allows_specific_time, available_days, min_lead_days,
                max_advance_days, is_active, display_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.code)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(draft.total_capacity)
        .bind(draft.additional_fee)
        .bind(draft.requires_signature)
        .bind(draft.allows_specific_time)
        .bind(&draft.available_days)
        .bind(draft.min_lead_days)
        .bind(draft.max_advance_days)
        .bind(draft.is_active)
        .bind(draft.display_order)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(row),
            Err(e) => {
                let err = AppError::from(e);
                if err.is_unique_violation() {
                    Err(AppError::Validation(format!("Slot code '{}' already exists", draft.code)))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn update_slot(
        &self,
        id: i32,
        draft: &TimeSlotDraft,
        booked_from: NaiveDate,
    ) -> AppResult<TimeSlotTemplate> {
        let mut tx = self.pool.begin().await?;

        // try_reserve holds this row FOR SHARE, so no booking lands between
        // the check below and the commit
        let locked: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM time_slot_templates WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!("Time slot {} not found", id)));
        }

        let busiest: Option<(NaiveDate, i32)> = sqlx::query_as(
            r#"
            SELECT service_date, booked_count
            FROM capacity_counters
            WHERE slot_id = $1 AND service_date >= $2 AND booked_count > $3
            ORDER BY booked_count DESC, service_date
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(booked_from)
        .bind(draft.total_capacity)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((date, booked)) = busiest {
            return Err(capacity_below_bookings(date, booked, draft.total_capacity));
        }

        let row = sqlx::query_as::<_, TimeSlotTemplate>(
            r#"
            UPDATE time_slot_templates SET
                name = $2, code = $3, start_time = $4, end_time = $5, total_capacity = $6,
                additional_fee = $7, requires_signature = $8, allows_specific_time = $9,
                available_days = $10, min_lead_days = $11, max_advance_days = $12,
                is_active = $13, display_order = $14, updated_at = $15
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&draft.name)
        .bind(&draft.code)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(draft.total_capacity)
        .bind(draft.additional_fee)
        .bind(draft.requires_signature)
        .bind(draft.allows_specific_time)
        .bind(&draft.available_days)
        .bind(draft.min_lead_days)
        .bind(draft.max_advance_days)
        .bind(draft.is_active)
        .bind(draft.display_order)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                let err = AppError::from(e);
                if err.is_unique_violation() {
                    return Err(AppError::Validation(format!("Slot code '{}' already exists", draft.code)));
                }
                return Err(err);
            }
        };

        tx.commit().await?;
        Ok(row)
    }

    // ---- Blackouts ----

    async fn list_blackouts(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> AppResult<Vec<BlackoutRule>> {
        let mut conditions = Vec::new();
        let mut idx = 1;

        if start_date.is_some() {
            conditions.push(format!("end_date >= ${}", idx));
            idx += 1;
        }
        if end_date.is_some() {
            conditions.push(format!("start_date <= ${}", idx));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT * FROM blackout_rules {} ORDER BY start_date, id",
            where_clause
        );

        let mut builder = sqlx::query_as::<_, BlackoutRule>(&query);
        if let Some(sd) = start_date { builder = builder.bind(sd); }
        if let Some(ed) = end_date { builder = builder.bind(ed); }

        let rows = builder.fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn create_blackout(&self, draft: &BlackoutDraft) -> AppResult<BlackoutRule> {
        let row = sqlx::query_as::<_, BlackoutRule>(
            r#"
            INSERT INTO blackout_rules (name, start_date, end_date, slot_ids, message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&draft.name)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(&draft.slot_ids)
        .bind(&draft.message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_blackout(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM blackout_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Blackout {} not found", id)));
        }
        Ok(())
    }
}
