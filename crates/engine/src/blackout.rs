use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::calendar::{format_timestamp, DateLabel};
use crate::error::{EngineError, Result};
use crate::models::{Appointment, BlackoutSlot};

/// Reason recorded on blackouts created by a payment confirmation.
pub const CONFIRMED_REASON: &str = "Подтвержденная запись";

/// Provider-declared unavailability, whole days or single times.
#[derive(Debug, Clone)]
pub struct BlackoutRegistry {
    pool: SqlitePool,
}

/// Blackouts affecting one date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayBlackouts {
    pub whole_day: bool,
    pub times: Vec<String>,
}

impl DayBlackouts {
    pub fn covers(&self, time_label: &str) -> bool {
        self.whole_day || self.times.iter().any(|t| t == time_label)
    }
}

impl BlackoutRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers a blackout. `time_label = None` blocks the whole day.
    pub async fn block(
        &self,
        date: &DateLabel,
        time_label: Option<&str>,
        reason: &str,
        now: NaiveDateTime,
    ) -> Result<BlackoutSlot> {
        let date_label = date.to_string();
        let created_at = format_timestamp(now);

        let result = sqlx::query(
            "INSERT INTO blackout_slots (date_label, time_label, reason, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&date_label)
        .bind(time_label)
        .bind(reason)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(
            "Blocked {} {} (#{})",
            date_label,
            time_label.unwrap_or("whole day"),
            id
        );

        Ok(BlackoutSlot {
            id,
            date_label,
            time_label: time_label.map(str::to_string),
            reason: reason.to_string(),
            appointment_id: None,
            created_at,
        })
    }

    /// Blacks out the slot of a confirmed appointment. Returns `false` if the
    /// appointment already had its entry or is no longer confirmed in storage.
    pub async fn block_for_appointment(
        &self,
        appointment: &Appointment,
        now: NaiveDateTime,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO blackout_slots (date_label, time_label, reason, appointment_id, created_at)
             SELECT ?, ?, ?, ?, ?
             WHERE NOT EXISTS (SELECT 1 FROM blackout_slots WHERE appointment_id = ?)
               AND EXISTS (SELECT 1 FROM appointments WHERE id = ? AND status = 'confirmed')",
        )
        .bind(&appointment.date_label)
        .bind(&appointment.time_label)
        .bind(CONFIRMED_REASON)
        .bind(appointment.id)
        .bind(format_timestamp(now))
        .bind(appointment.id)
        .bind(appointment.id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() == 1),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the blackout tied to an appointment, if any.
    pub async fn release_for_appointment(&self, appointment_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM blackout_slots WHERE appointment_id = ?")
            .bind(appointment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn unblock(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM blackout_slots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::BlackoutNotFound(id));
        }
        tracing::info!("Unblocked #{}", id);
        Ok(())
    }

    /// All blackouts, or those of one date.
    pub async fn list(&self, date: Option<&DateLabel>) -> Result<Vec<BlackoutSlot>> {
        let slots = match date {
            Some(date) => {
                sqlx::query_as::<_, BlackoutSlot>(
                    "SELECT id, date_label, time_label, reason, appointment_id, created_at
                     FROM blackout_slots WHERE date_label = ? ORDER BY id ASC",
                )
                .bind(date.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BlackoutSlot>(
                    "SELECT id, date_label, time_label, reason, appointment_id, created_at
                     FROM blackout_slots ORDER BY id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(slots)
    }

    pub async fn day(&self, date: &DateLabel) -> Result<DayBlackouts> {
        let mut day = DayBlackouts::default();
        for slot in self.list(Some(date)).await? {
            match slot.time_label {
                None => day.whole_day = true,
                Some(time) => day.times.push(time),
            }
        }
        Ok(day)
    }

    /// Dates blocked as a whole, for the date picker.
    pub async fn whole_day_labels(&self) -> Result<Vec<String>> {
        let labels = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT date_label FROM blackout_slots WHERE time_label IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }
}
