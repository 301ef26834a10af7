//! Durable appointment store.
//!
//! Every write that depends on the current state of a row is a single
//! conditional statement, so concurrent writers (request handlers, the bot,
//! the expiry sweep) never overwrite each other silently.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::calendar::{format_timestamp, DateLabel};
use crate::error::{EngineError, Result};
use crate::lifecycle::{PaymentStatus, Status};
use crate::models::{Appointment, AppointmentRow, NewAppointment};

const APPOINTMENT_SELECT: &str =
    "SELECT id, client_name, client_phone, date_label, time_label, status, payment_status,
            created_at, confirmed_at, cancelled_at, client_ref, reminder_sent
     FROM appointments";

#[derive(Debug, Clone)]
pub struct AppointmentLedger {
    pool: SqlitePool,
}

impl AppointmentLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Writes a Pending/NotPaid hold if, at the moment of the write, the slot
    /// is neither occupied by an active appointment nor blacked out.
    ///
    /// Returns `None` when the slot was taken; nothing is written in that case.
    pub async fn insert_hold(
        &self,
        new: &NewAppointment,
        created_at: NaiveDateTime,
    ) -> Result<Option<Appointment>> {
        let date_label = new.date.to_string();
        let created_at = format_timestamp(created_at);

        let result = sqlx::query(
            "INSERT INTO appointments
                (client_name, client_phone, date_label, time_label,
                 status, payment_status, created_at, client_ref)
             SELECT ?, ?, ?, ?, 'pending', 'not_paid', ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM appointments
                 WHERE date_label = ? AND time_label = ? AND status IN ('pending', 'confirmed')
             )
             AND NOT EXISTS (
                 SELECT 1 FROM blackout_slots
                 WHERE date_label = ? AND (time_label IS NULL OR time_label = ?)
             )",
        )
        .bind(&new.client_name)
        .bind(&new.client_phone)
        .bind(&date_label)
        .bind(&new.time_label)
        .bind(&created_at)
        .bind(new.client_ref)
        .bind(&date_label)
        .bind(&new.time_label)
        .bind(&date_label)
        .bind(&new.time_label)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            // The partial unique index caught a writer that slipped past the guard.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(Appointment {
            id: result.last_insert_rowid(),
            client_name: new.client_name.clone(),
            client_phone: new.client_phone.clone(),
            date_label,
            time_label: new.time_label.clone(),
            status: Status::Pending,
            payment_status: PaymentStatus::NotPaid,
            created_at,
            confirmed_at: None,
            cancelled_at: None,
            client_ref: new.client_ref,
            reminder_sent: false,
        }))
    }

    pub async fn find(&self, id: i64) -> Result<Option<Appointment>> {
        let row = sqlx::query_as::<_, AppointmentRow>(&format!("{} WHERE id = ?", APPOINTMENT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Appointment::try_from).transpose()
    }

    /// Like [`find`](Self::find), but a missing row is `NotFound`.
    pub async fn fetch(&self, id: i64) -> Result<Appointment> {
        self.find(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Moves `id` from `expected` to `next` only if the row still has
    /// `expected` at write time. Returns whether the row was updated.
    ///
    /// Callers validate the pair with [`crate::lifecycle::next`] first.
    pub async fn compare_and_set(
        &self,
        id: i64,
        expected: Status,
        next: Status,
        at: NaiveDateTime,
    ) -> Result<bool> {
        let at = format_timestamp(at);

        let result = match next {
            Status::Confirmed => {
                sqlx::query(
                    "UPDATE appointments
                     SET status = 'confirmed', payment_status = 'paid', confirmed_at = ?
                     WHERE id = ? AND status = ?",
                )
                .bind(&at)
                .bind(id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            Status::Cancelled => {
                sqlx::query(
                    "UPDATE appointments SET status = 'cancelled', cancelled_at = ?
                     WHERE id = ? AND status = ?",
                )
                .bind(&at)
                .bind(id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            Status::Expired => {
                // Only unpaid holds expire; a paid row is never touched here.
                sqlx::query(
                    "UPDATE appointments SET status = 'expired'
                     WHERE id = ? AND status = ? AND payment_status = 'not_paid'",
                )
                .bind(id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            Status::Pending => {
                return Err(EngineError::InvalidRequest(
                    "appointments never return to pending".into(),
                ))
            }
        };

        Ok(result.rows_affected() == 1)
    }

    /// Raw Pending/NotPaid rows for the expiry sweep, unvalidated so that one
    /// bad row cannot hide the others.
    pub async fn pending_holds(&self) -> Result<Vec<AppointmentRow>> {
        let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
            "{} WHERE status = 'pending' AND payment_status = 'not_paid' ORDER BY id ASC",
            APPOINTMENT_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Time labels held by Pending/Confirmed appointments on `date`.
    pub async fn occupied_times(&self, date: &DateLabel) -> Result<Vec<String>> {
        let times = sqlx::query_scalar::<_, String>(
            "SELECT time_label FROM appointments
             WHERE date_label = ? AND status IN ('pending', 'confirmed')",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(times)
    }

    pub async fn active(&self) -> Result<Vec<Appointment>> {
        self.fetch_valid(
            &format!(
                "{} WHERE status IN ('pending', 'confirmed') ORDER BY id ASC",
                APPOINTMENT_SELECT
            ),
            &[],
        )
        .await
    }

    pub async fn active_for_client(&self, client_ref: i64) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
            "{} WHERE client_ref = ? AND status IN ('pending', 'confirmed') ORDER BY id ASC",
            APPOINTMENT_SELECT
        ))
        .bind(client_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(keep_valid(rows))
    }

    pub async fn active_on(&self, date: &DateLabel) -> Result<Vec<Appointment>> {
        self.fetch_valid(
            &format!(
                "{} WHERE date_label = ? AND status IN ('pending', 'confirmed')
                 ORDER BY time_label ASC",
                APPOINTMENT_SELECT
            ),
            &[date.to_string()],
        )
        .await
    }

    /// Active appointments whose phone contains `fragment`.
    pub async fn search_by_phone(&self, fragment: &str) -> Result<Vec<Appointment>> {
        self.fetch_valid(
            &format!(
                "{} WHERE instr(client_phone, ?) > 0 AND status IN ('pending', 'confirmed')
                 ORDER BY id ASC",
                APPOINTMENT_SELECT
            ),
            &[fragment.to_string()],
        )
        .await
    }

    pub async fn unreminded_confirmed_on(&self, date: &DateLabel) -> Result<Vec<Appointment>> {
        self.fetch_valid(
            &format!(
                "{} WHERE date_label = ? AND status = 'confirmed' AND reminder_sent = 0
                 ORDER BY time_label ASC",
                APPOINTMENT_SELECT
            ),
            &[date.to_string()],
        )
        .await
    }

    /// Flags the reminder as sent. Returns `false` if it already was.
    pub async fn mark_reminded(&self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE appointments SET reminder_sent = 1 WHERE id = ? AND reminder_sent = 0")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_valid(&self, sql: &str, params: &[String]) -> Result<Vec<Appointment>> {
        let mut query = sqlx::query_as::<_, AppointmentRow>(sql);
        for param in params {
            query = query.bind(param.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(keep_valid(rows))
    }
}

/// Converts rows, dropping (and reporting) the ones that fail validation.
fn keep_valid(rows: Vec<AppointmentRow>) -> Vec<Appointment> {
    rows.into_iter()
        .filter_map(|row| match Appointment::try_from(row) {
            Ok(appointment) => Some(appointment),
            Err(e) => {
                tracing::warn!(target: "integrity", "Skipping appointment row: {}", e);
                None
            }
        })
        .collect()
}
