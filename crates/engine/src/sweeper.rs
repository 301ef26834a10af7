//! Background reclamation of unpaid holds.

use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

use crate::calendar::{parse_timestamp, Clock};
use crate::error::Result;
use crate::ledger::AppointmentLedger;
use crate::lifecycle::Lifecycle;
use crate::models::Appointment;

/// Delay before the first sweep after start-up.
const FIRST_SWEEP_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Clone)]
pub struct ExpirySweeper {
    ledger: AppointmentLedger,
    lifecycle: Lifecycle,
    payment_window: Duration,
}

impl ExpirySweeper {
    pub fn new(ledger: AppointmentLedger, lifecycle: Lifecycle, payment_window: Duration) -> Self {
        Self {
            ledger,
            lifecycle,
            payment_window,
        }
    }

    /// Expires every unpaid hold older than the payment window and returns
    /// them as they were before expiry.
    ///
    /// Rows that cannot be read are reported and skipped. A hold confirmed
    /// between the scan and the write is left alone.
    pub async fn sweep(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        let mut expired = Vec::new();

        for row in self.ledger.pending_holds().await? {
            let id = row.id;
            let Some(created_at) = parse_timestamp(&row.created_at) else {
                tracing::warn!(
                    target: "integrity",
                    "Appointment #{} has unparsable created_at {:?}, skipped",
                    id,
                    row.created_at
                );
                continue;
            };

            if now - created_at <= self.payment_window {
                continue;
            }

            let hold = match Appointment::try_from(row) {
                Ok(hold) => hold,
                Err(e) => {
                    tracing::warn!(target: "integrity", "Skipping hold: {}", e);
                    continue;
                }
            };

            match self.lifecycle.expire(&hold, now).await {
                Ok(true) => {
                    tracing::info!(
                        "Expired unpaid hold #{} ({} {})",
                        hold.id,
                        hold.date_label,
                        hold.time_label
                    );
                    expired.push(hold);
                }
                Ok(false) => tracing::debug!("Hold #{} changed before expiry, left as is", id),
                Err(e) => tracing::warn!(target: "integrity", "Could not expire #{}: {}", id, e),
            }
        }

        tracing::debug!("Sweep done: {} hold(s) expired", expired.len());
        Ok(expired)
    }

    /// Sweeps every `interval` until the task is dropped.
    pub async fn run(self, clock: Arc<dyn Clock>, interval: std::time::Duration) {
        tokio::time::sleep(FIRST_SWEEP_DELAY).await;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(clock.now()).await {
                tracing::error!("Expiry sweep failed: {}", e);
            }
        }
    }
}
