use thiserror::Error;

use crate::cancellation::CancellationOutcome;
use crate::lifecycle::{Action, Status};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid date label: {0:?}")]
    InvalidDateFormat(String),

    #[error("Invalid time label: {0:?}")]
    InvalidTimeFormat(String),

    #[error("Slot {date} {time} is no longer available")]
    SlotNoLongerAvailable { date: String, time: String },

    #[error("Invalid transition: {action:?} from {from}")]
    InvalidTransition { from: Status, action: Action },

    #[error("Appointment #{0} not found")]
    NotFound(i64),

    #[error("Blackout #{0} not found")]
    BlackoutNotFound(i64),

    /// A conditional write lost a race: the row no longer had the expected status.
    #[error("Appointment #{id} is no longer {expected}")]
    PreconditionFailed { id: i64, expected: Status },

    #[error("Cancellation not allowed: {0:?}")]
    CancellationDenied(CancellationOutcome),

    #[error("Appointment #{id} has unreadable data: {reason}")]
    CorruptRecord { id: i64, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// True for errors the presentation layer handles by re-prompting the user.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::Database(_) | EngineError::CorruptRecord { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
