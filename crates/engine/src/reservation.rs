use chrono::NaiveDateTime;

use crate::availability::AvailabilityResolver;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::ledger::AppointmentLedger;
use crate::models::BookingDraft;

/// Commits new bookings. The only writer of Pending appointments.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator {
    availability: AvailabilityResolver,
    ledger: AppointmentLedger,
    events: EventSink,
}

impl ReservationCoordinator {
    pub fn new(availability: AvailabilityResolver, ledger: AppointmentLedger, events: EventSink) -> Self {
        Self {
            availability,
            ledger,
            events,
        }
    }

    /// Places a Pending/NotPaid hold for the draft's slot and returns its id.
    ///
    /// The time-dependent predicates (past date, started slot, roster) are
    /// checked first; the occupancy and blackout predicates are re-checked by
    /// the insert itself, so a concurrent booking can never slip in between.
    pub async fn reserve(&self, draft: &BookingDraft, now: NaiveDateTime) -> Result<i64> {
        let new = draft.complete()?;
        let unavailable = || EngineError::SlotNoLongerAvailable {
            date: new.date.to_string(),
            time: new.time_label.clone(),
        };

        if !self.availability.is_bookable(&new.date, &new.time_label, now).await? {
            return Err(unavailable());
        }

        let appointment = self
            .ledger
            .insert_hold(&new, now)
            .await?
            .ok_or_else(unavailable)?;

        tracing::info!(
            "New booking #{}: {} {} for {}",
            appointment.id,
            appointment.date_label,
            appointment.time_label,
            appointment.client_name
        );

        let id = appointment.id;
        self.events.emit(EngineEvent::NewBooking(appointment));
        Ok(id)
    }
}
