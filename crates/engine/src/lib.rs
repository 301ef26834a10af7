//! Slot-based appointment engine for a single-provider studio.
//!
//! Everything goes through [`Scheduler`]; the components it wires together are
//! public for front ends that need finer control (the sweeper loop, events).

pub mod availability;
pub mod blackout;
pub mod calendar;
pub mod cancellation;
pub mod config;
pub mod contacts;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod reservation;
pub mod scheduler;
pub mod sweeper;

pub use calendar::{Clock, DateLabel, ManualClock, SystemClock};
pub use cancellation::{CancellationOutcome, Canceller};
pub use config::{EngineConfig, SlotRoster};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSink};
pub use lifecycle::{Action, PaymentStatus, Status};
pub use models::{Appointment, BlackoutSlot, BookingDraft, BotUser, ChatMessage};
pub use scheduler::Scheduler;
