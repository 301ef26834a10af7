//! Slot availability: the roster minus the past, blackouts and active bookings.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::blackout::{BlackoutRegistry, DayBlackouts};
use crate::calendar::{parse_time_label, DateLabel};
use crate::config::SlotRoster;
use crate::error::Result;
use crate::ledger::AppointmentLedger;

/// Roster times on `date` that are bookable at `now`, in roster order.
///
/// A slot qualifies iff its date is not in the past, its start is strictly
/// after `now`, no blackout covers it and no active appointment holds it.
pub fn bookable_slots(
    roster: &SlotRoster,
    date: &DateLabel,
    now: NaiveDateTime,
    blackouts: &DayBlackouts,
    occupied: &[String],
) -> Result<Vec<String>> {
    let day = date.resolve_strict(now.date())?;
    if day < now.date() || blackouts.whole_day {
        return Ok(Vec::new());
    }

    let mut slots = Vec::new();
    for time_label in roster.iter() {
        let starts_at = day.and_time(parse_time_label(time_label)?);
        if starts_at <= now
            || blackouts.covers(time_label)
            || occupied.iter().any(|t| t == time_label)
        {
            continue;
        }
        slots.push(time_label.to_string());
    }
    Ok(slots)
}

#[derive(Debug, Clone)]
pub struct AvailabilityResolver {
    ledger: AppointmentLedger,
    blackouts: BlackoutRegistry,
    roster: SlotRoster,
}

impl AvailabilityResolver {
    pub fn new(ledger: AppointmentLedger, blackouts: BlackoutRegistry, roster: SlotRoster) -> Self {
        Self {
            ledger,
            blackouts,
            roster,
        }
    }

    pub fn roster(&self) -> &SlotRoster {
        &self.roster
    }

    pub async fn slots(&self, date: &DateLabel, now: NaiveDateTime) -> Result<Vec<String>> {
        let blackouts = self.blackouts.day(date).await?;
        let occupied = self.ledger.occupied_times(date).await?;
        bookable_slots(&self.roster, date, now, &blackouts, &occupied)
    }

    /// Point check used before committing a reservation.
    pub async fn is_bookable(&self, date: &DateLabel, time_label: &str, now: NaiveDateTime) -> Result<bool> {
        if !self.roster.contains(time_label) {
            return Ok(false);
        }
        Ok(self.slots(date, now).await?.iter().any(|t| t == time_label))
    }

    /// Labels for `today` and the following `days - 1` days, minus whole-day blackouts.
    pub async fn bookable_dates(&self, today: NaiveDate, days: u32) -> Result<Vec<DateLabel>> {
        let blocked = self.blackouts.whole_day_labels().await?;

        let dates = (0..i64::from(days))
            .map(|offset| DateLabel::for_date(today + Duration::days(offset)))
            .filter(|label| !blocked.contains(&label.to_string()))
            .collect();
        Ok(dates)
    }
}
