//! Appointment status machine.
//!
//! [`next`] is the single place where status changes are validated. It is a
//! pure function of the current status and the requested action; applying the
//! result to storage is the job of [`Lifecycle`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::blackout::BlackoutRegistry;
use crate::cancellation::Canceller;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::ledger::AppointmentLedger;
use crate::models::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Cancelled => "cancelled",
            Status::Expired => "expired",
        }
    }

    /// Pending and Confirmed appointments occupy their slot.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "confirmed" => Ok(Status::Confirmed),
            "cancelled" => Ok(Status::Cancelled),
            "expired" => Ok(Status::Expired),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotPaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::NotPaid => "not_paid",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_paid" => Ok(PaymentStatus::NotPaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// The provider saw the prepayment and confirms the hold.
    PaymentConfirmed,
    ClientCancel,
    AdminCancel,
    /// Only the expiry sweep issues this.
    SweepExpire,
}

/// Validates `action` against `from` and returns the resulting status.
///
/// Confirming an already confirmed appointment is accepted and changes nothing,
/// so a repeated confirmation is safe.
pub fn next(from: Status, action: Action) -> Result<Status> {
    use Action::*;
    use Status::*;

    match (from, action) {
        (Pending | Confirmed, PaymentConfirmed) => Ok(Confirmed),
        (Pending | Confirmed, ClientCancel | AdminCancel) => Ok(Cancelled),
        (Pending, SweepExpire) => Ok(Expired),
        (from, action) => Err(EngineError::InvalidTransition { from, action }),
    }
}

// ── Applying transitions ──

/// Applies validated transitions to the ledger together with their side effects.
#[derive(Clone)]
pub struct Lifecycle {
    ledger: AppointmentLedger,
    blackouts: BlackoutRegistry,
    events: EventSink,
}

impl Lifecycle {
    pub fn new(ledger: AppointmentLedger, blackouts: BlackoutRegistry, events: EventSink) -> Self {
        Self {
            ledger,
            blackouts,
            events,
        }
    }

    /// Pending → Confirmed, marking the hold as paid and blacking out its slot.
    ///
    /// Repeating the call on a confirmed appointment returns it unchanged and
    /// leaves exactly one blackout entry behind.
    pub async fn confirm_payment(&self, id: i64, now: NaiveDateTime) -> Result<Appointment> {
        let current = self.ledger.fetch(id).await?;
        let target = next(current.status, Action::PaymentConfirmed)?;

        if current.status != target {
            if !self
                .ledger
                .compare_and_set(id, current.status, target, now)
                .await?
            {
                return Err(self.lost_race(id, current.status).await);
            }
            tracing::info!(
                "Appointment #{} confirmed ({} {})",
                id,
                current.date_label,
                current.time_label
            );
        }

        let confirmed = self.ledger.fetch(id).await?;
        if confirmed.status != Status::Confirmed {
            return Err(EngineError::PreconditionFailed {
                id,
                expected: Status::Confirmed,
            });
        }
        if self.blackouts.block_for_appointment(&confirmed, now).await? {
            tracing::debug!("Slot {} {} blacked out for #{}", confirmed.date_label, confirmed.time_label, id);
        }

        if current.status != target {
            self.events.emit(EngineEvent::Confirmed(confirmed.clone()));
        }
        Ok(confirmed)
    }

    /// Pending/Confirmed → Cancelled. Policy gating happens before this call.
    pub async fn cancel(&self, current: &Appointment, by: Canceller, now: NaiveDateTime) -> Result<Appointment> {
        let target = next(current.status, by.action())?;

        if !self
            .ledger
            .compare_and_set(current.id, current.status, target, now)
            .await?
        {
            return Err(self.lost_race(current.id, current.status).await);
        }

        let released = self.blackouts.release_for_appointment(current.id).await?;
        tracing::info!(
            "Appointment #{} cancelled by {:?} ({} {}, {} blackout(s) released)",
            current.id,
            by,
            current.date_label,
            current.time_label,
            released
        );

        let cancelled = self.ledger.fetch(current.id).await?;
        self.events.emit(EngineEvent::Cancelled {
            appointment: cancelled.clone(),
            by,
        });
        Ok(cancelled)
    }

    /// Pending → Expired, only if the row is still an unpaid hold at write time.
    ///
    /// Returns `false` when the row moved on in the meantime (for example, it
    /// was confirmed a moment ago); the newer status is left untouched.
    pub async fn expire(&self, hold: &Appointment, now: NaiveDateTime) -> Result<bool> {
        let target = next(hold.status, Action::SweepExpire)?;
        let expired = self
            .ledger
            .compare_and_set(hold.id, hold.status, target, now)
            .await?;
        if expired {
            self.events.emit(EngineEvent::ExpiredHold(hold.clone()));
        }
        Ok(expired)
    }

    /// Explains why a conditional write matched no row.
    async fn lost_race(&self, id: i64, expected: Status) -> EngineError {
        match self.ledger.fetch(id).await {
            Ok(_) => EngineError::PreconditionFailed { id, expected },
            Err(e) => e,
        }
    }
}
