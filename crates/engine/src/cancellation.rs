//! Cancellation policy: who may cancel what, and how close to the slot.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::lifecycle::{Action, PaymentStatus, Status};

/// Hours before the slot under which a client cancellation needs a second confirmation.
pub const NOTICE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationOutcome {
    /// Nothing to cancel (already terminal).
    Refuse,
    /// Late cancellation: the client has to confirm once more.
    RequireDoubleConfirm,
    /// Paid and far enough ahead: the client must talk to the provider.
    RequireProviderContact,
    CancelImmediately,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Canceller {
    Client,
    Admin,
}

impl Canceller {
    pub fn action(self) -> Action {
        match self {
            Canceller::Client => Action::ClientCancel,
            Canceller::Admin => Action::AdminCancel,
        }
    }

    /// Whether this canceller may go ahead given the policy outcome.
    pub fn may_cancel(self, outcome: CancellationOutcome) -> bool {
        match self {
            Canceller::Client => matches!(
                outcome,
                CancellationOutcome::CancelImmediately | CancellationOutcome::RequireDoubleConfirm
            ),
            Canceller::Admin => outcome != CancellationOutcome::Refuse,
        }
    }
}

/// Decides how a client request to cancel is handled.
///
/// `time_to_appointment` is the slot start minus now; negative once the slot
/// has started. An unpaid hold is released at any time.
pub fn decide(
    status: Status,
    payment_status: PaymentStatus,
    time_to_appointment: Duration,
) -> CancellationOutcome {
    if status.is_terminal() {
        return CancellationOutcome::Refuse;
    }

    match (status, payment_status) {
        (Status::Pending, PaymentStatus::NotPaid) => CancellationOutcome::CancelImmediately,
        _ if time_to_appointment < Duration::hours(NOTICE_HOURS) => {
            CancellationOutcome::RequireDoubleConfirm
        }
        _ => CancellationOutcome::RequireProviderContact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpaid_far_ahead_cancels_immediately() {
        assert_eq!(
            decide(Status::Pending, PaymentStatus::NotPaid, Duration::hours(48)),
            CancellationOutcome::CancelImmediately
        );
    }

    #[test]
    fn test_paid_far_ahead_requires_provider() {
        assert_eq!(
            decide(Status::Confirmed, PaymentStatus::Paid, Duration::hours(24) + Duration::minutes(1)),
            CancellationOutcome::RequireProviderContact
        );
    }

    #[test]
    fn test_late_paid_cancellation_requires_double_confirm() {
        let late = Duration::hours(23) + Duration::minutes(59);
        assert_eq!(
            decide(Status::Confirmed, PaymentStatus::Paid, late),
            CancellationOutcome::RequireDoubleConfirm
        );
    }

    #[test]
    fn test_unpaid_hold_cancels_at_any_time() {
        for hours in [-2, 1, 23, 24, 72] {
            assert_eq!(
                decide(Status::Pending, PaymentStatus::NotPaid, Duration::hours(hours)),
                CancellationOutcome::CancelImmediately
            );
        }
    }

    #[test]
    fn test_exactly_24_hours_is_not_late() {
        assert_eq!(
            decide(Status::Confirmed, PaymentStatus::Paid, Duration::hours(24)),
            CancellationOutcome::RequireProviderContact
        );
    }

    #[test]
    fn test_past_paid_slot_is_late() {
        assert_eq!(
            decide(Status::Confirmed, PaymentStatus::Paid, Duration::hours(-2)),
            CancellationOutcome::RequireDoubleConfirm
        );
    }

    #[test]
    fn test_terminal_statuses_refuse() {
        for status in [Status::Expired, Status::Cancelled] {
            assert_eq!(
                decide(status, PaymentStatus::NotPaid, Duration::hours(1)),
                CancellationOutcome::Refuse
            );
        }
    }

    #[test]
    fn test_who_may_cancel() {
        use CancellationOutcome::*;
        assert!(Canceller::Client.may_cancel(CancelImmediately));
        assert!(Canceller::Client.may_cancel(RequireDoubleConfirm));
        assert!(!Canceller::Client.may_cancel(RequireProviderContact));
        assert!(!Canceller::Client.may_cancel(Refuse));
        assert!(Canceller::Admin.may_cancel(RequireProviderContact));
        assert!(!Canceller::Admin.may_cancel(Refuse));
    }
}
