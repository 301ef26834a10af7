use serde::{Deserialize, Serialize};

use crate::calendar::DateLabel;
use crate::error::{EngineError, Result};
use crate::lifecycle::{PaymentStatus, Status};

// ── Stored records ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub client_name: String,
    pub client_phone: String,
    /// Year-less label, stored verbatim (`Пн 01.01`).
    pub date_label: String,
    pub time_label: String,
    pub status: Status,
    pub payment_status: PaymentStatus,
    pub created_at: String,
    pub confirmed_at: Option<String>,
    pub cancelled_at: Option<String>,
    /// Telegram chat id of the client.
    pub client_ref: i64,
    pub reminder_sent: bool,
}

/// Raw `appointments` row. Status columns are plain text until validated.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub date_label: String,
    pub time_label: String,
    pub status: String,
    pub payment_status: String,
    pub created_at: String,
    pub confirmed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub client_ref: i64,
    pub reminder_sent: bool,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = EngineError;

    fn try_from(row: AppointmentRow) -> Result<Self> {
        let corrupt = |reason: String| EngineError::CorruptRecord { id: row.id, reason };
        let status = row.status.parse::<Status>().map_err(corrupt)?;
        let payment_status = row.payment_status.parse::<PaymentStatus>().map_err(corrupt)?;

        Ok(Appointment {
            id: row.id,
            client_name: row.client_name,
            client_phone: row.client_phone,
            date_label: row.date_label,
            time_label: row.time_label,
            status,
            payment_status,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
            client_ref: row.client_ref,
            reminder_sent: row.reminder_sent,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlackoutSlot {
    pub id: i64,
    pub date_label: String,
    /// `None` blacks out the whole day.
    pub time_label: Option<String>,
    pub reason: String,
    /// Set when the entry was registered by a payment confirmation.
    pub appointment_id: Option<i64>,
    pub created_at: String,
}

impl BlackoutSlot {
    pub fn is_whole_day(&self) -> bool {
        self.time_label.is_none()
    }
}

// ── Contacts ──

/// Someone who has opened the bot. Broadcasts go to everyone here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BotUser {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub first_seen: String,
}

impl BotUser {
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("Клиент")
    }
}

/// One relayed message between a client and the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub client_chat_id: i64,
    pub client_name: String,
    pub body: String,
    /// `false` for the provider's replies.
    pub from_client: bool,
    pub created_at: String,
}

// ── Booking context ──

/// Per-client scratch data collected by the front end before a reservation.
///
/// The conversation fills it one step at a time and hands the finished value
/// to [`crate::Scheduler::reserve`]; the engine keeps no per-client state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub date_label: Option<String>,
    pub time_label: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_ref: i64,
}

impl BookingDraft {
    pub fn new(client_ref: i64) -> Self {
        Self {
            client_ref,
            ..Self::default()
        }
    }

    pub fn with_date(mut self, date_label: impl Into<String>) -> Self {
        self.date_label = Some(date_label.into());
        self
    }

    pub fn with_time(mut self, time_label: impl Into<String>) -> Self {
        self.time_label = Some(time_label.into());
        self
    }

    pub fn with_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = Some(client_name.into());
        self
    }

    pub fn with_phone(mut self, client_phone: impl Into<String>) -> Self {
        self.client_phone = Some(client_phone.into());
        self
    }

    /// Checks that every step was answered and the name is not blank.
    pub fn complete(&self) -> Result<NewAppointment> {
        let missing = |field: &str| EngineError::InvalidRequest(format!("{} is missing", field));

        let date_label = self.date_label.as_deref().ok_or_else(|| missing("date"))?;
        let time_label = self.time_label.clone().ok_or_else(|| missing("time"))?;
        let client_name = self
            .client_name
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| missing("client name"))?;
        let client_phone = self.client_phone.clone().ok_or_else(|| missing("phone"))?;

        if client_name.is_empty() {
            return Err(EngineError::InvalidRequest("client name is empty".into()));
        }

        Ok(NewAppointment {
            date: DateLabel::parse(date_label)?,
            time_label,
            client_name: client_name.to_string(),
            client_phone: client_phone.trim().to_string(),
            client_ref: self.client_ref,
        })
    }
}

/// A validated reservation request, ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub date: DateLabel,
    pub time_label: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_ref: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_draft() -> BookingDraft {
        BookingDraft::new(42)
            .with_date("Пн 01.01")
            .with_time("10:00")
            .with_name("  Анна ")
            .with_phone("+7 900 000-00-00")
    }

    #[test]
    fn test_complete_draft_trims_name() {
        let new = full_draft().complete().unwrap();
        assert_eq!(new.client_name, "Анна");
        assert_eq!(new.date.to_string(), "Пн 01.01");
        assert_eq!(new.client_ref, 42);
    }

    #[test]
    fn test_draft_missing_step() {
        let draft = BookingDraft::new(1).with_date("Пн 01.01").with_time("10:00");
        assert!(matches!(draft.complete(), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn test_draft_blank_name() {
        let draft = full_draft().with_name("   ");
        assert!(matches!(draft.complete(), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn test_draft_bad_date_label() {
        let draft = full_draft().with_date("2026-01-01");
        assert!(matches!(draft.complete(), Err(EngineError::InvalidDateFormat(_))));
    }

    #[test]
    fn test_phone_is_not_validated() {
        let new = full_draft().with_phone("call me maybe").complete().unwrap();
        assert_eq!(new.client_phone, "call me maybe");
    }

    fn row(status: &str) -> AppointmentRow {
        AppointmentRow {
            id: 7,
            client_name: "Анна".into(),
            client_phone: "1".into(),
            date_label: "Пн 01.01".into(),
            time_label: "10:00".into(),
            status: status.into(),
            payment_status: "not_paid".into(),
            created_at: "2026-01-01 09:00:00".into(),
            confirmed_at: None,
            cancelled_at: None,
            client_ref: 1,
            reminder_sent: false,
        }
    }

    #[test]
    fn test_row_conversion() {
        let appointment = Appointment::try_from(row("pending")).unwrap();
        assert_eq!(appointment.status, Status::Pending);
        assert_eq!(appointment.payment_status, PaymentStatus::NotPaid);
    }

    #[test]
    fn test_row_with_unknown_status_is_corrupt() {
        assert!(matches!(
            Appointment::try_from(row("pending_payment")),
            Err(EngineError::CorruptRecord { id: 7, .. })
        ));
    }

    #[test]
    fn test_appointment_serializes_status_lowercase() {
        let appointment = Appointment::try_from(row("confirmed")).unwrap();
        let json = serde_json::to_value(&appointment).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["payment_status"], "not_paid");
    }
}
