use tokio::sync::mpsc;

use crate::cancellation::Canceller;
use crate::models::Appointment;

/// Something the provider or the client should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A hold was placed and awaits prepayment.
    NewBooking(Appointment),
    /// The sweep released an unpaid hold (carries the hold as it was).
    ExpiredHold(Appointment),
    Confirmed(Appointment),
    Cancelled {
        appointment: Appointment,
        by: Canceller,
    },
}

/// Fire-and-forget event outlet. Delivery failures never affect the engine.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("Event receiver dropped, event discarded");
            }
        }
    }
}
