use axum::{extract::State, Json};
use salon_engine::{calendar::format_timestamp, Status};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize, Default)]
pub struct BookingCounts {
    /// Unpaid holds waiting for the sweeper or a confirmation.
    pub pending: usize,
    pub confirmed: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub storage_ok: bool,
    /// Provider-local wall time the engine is working with.
    pub engine_now: String,
    pub payment_window_mins: i64,
    pub bookings: Option<BookingCounts>,
}

/// Liveness plus a read through the engine, so a broken schema shows up too.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let bookings = match state.scheduler.active_appointments().await {
        Ok(active) => Some(active.iter().fold(BookingCounts::default(), |mut counts, a| {
            match a.status {
                Status::Pending => counts.pending += 1,
                Status::Confirmed => counts.confirmed += 1,
                _ => {}
            }
            counts
        })),
        Err(e) => {
            tracing::warn!("Health check could not read appointments: {}", e);
            None
        }
    };
    let storage_ok = bookings.is_some();

    Json(HealthResponse {
        status: if storage_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        storage_ok,
        engine_now: format_timestamp(state.scheduler.now()),
        payment_window_mins: state.scheduler.config().payment_window.num_minutes(),
        bookings,
    })
}
