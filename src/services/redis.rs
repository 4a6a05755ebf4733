//! Redis-backed reminder queue
//!
//! Due reminders live in the sorted set `reminders:due` (score = fire time in
//! epoch seconds, member = `{appointment_id}:{kind}`); their JSON payloads live
//! in the hash `reminders:payload` under the same member. The dispatcher pops
//! members whose score is in the past.

use async_trait::async_trait;
use redis::Client;

use super::notifications::{Notifier, Reminder, ReminderKind};
use crate::error::{AppError, AppResult};

const DUE_KEY: &str = "reminders:due";
const PAYLOAD_KEY: &str = "reminders:payload";

#[derive(Clone)]
pub struct RedisReminderQueue {
    client: Client,
}

impl RedisReminderQueue {
    /// Connect and check the server answers
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Notification(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Notification(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Notification(format!("Redis connection test failed: {}", e)))?;

        Ok(Self { client })
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Notification(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl Notifier for RedisReminderQueue {
    async fn enqueue(&self, reminder: &Reminder) -> AppResult<()> {
        let payload = serde_json::to_string(reminder)
            .map_err(|e| AppError::Internal(format!("Failed to serialize reminder: {}", e)))?;
        let member = reminder.key();

        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .zadd(DUE_KEY, &member, reminder.fire_at.timestamp())
            .ignore()
            .hset(PAYLOAD_KEY, &member, payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Notification(format!("Failed to enqueue reminder: {}", e)))?;

        tracing::debug!(
            appointment_id = reminder.appointment_id,
            kind = %reminder.kind,
            fire_at = %reminder.fire_at,
            "Reminder queued"
        );
        Ok(())
    }

    async fn invalidate(&self, appointment_id: i32) -> AppResult<()> {
        let members: Vec<String> = [ReminderKind::DayBefore, ReminderKind::DayOf, ReminderKind::OneHourBefore]
            .iter()
            .map(|kind| format!("{}:{}", appointment_id, kind))
            .collect();

        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .zrem(DUE_KEY, &members)
            .ignore()
            .hdel(PAYLOAD_KEY, &members)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Notification(format!("Failed to invalidate reminders: {}", e)))?;

        Ok(())
    }
}
