use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use salon_engine::{Appointment, BlackoutSlot, Canceller};
use std::sync::Arc;

use crate::{auth, models::*, AppState};

/// GET /api/admin/appointments?date=&phone= — active appointments, filtered
/// by phone fragment or by date when given.
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminAppointmentsQuery>,
) -> ApiResult<Vec<Appointment>> {
    auth::require_admin(&headers, &state)?;

    let appointments = match (query.phone.as_deref(), query.date.as_deref()) {
        (Some(phone), _) => state.scheduler.search_by_phone(phone).await,
        (None, Some(date)) => state.scheduler.appointments_on(date).await,
        (None, None) => state.scheduler.active_appointments().await,
    }
    .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(appointments)))
}

/// POST /api/admin/appointments/{id}/confirm — prepayment received.
pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Appointment> {
    auth::require_admin(&headers, &state)?;

    let confirmed = state.scheduler.confirm_payment(id).await.map_err(engine_error)?;
    Ok(Json(ApiResponse::success(confirmed)))
}

/// POST /api/admin/appointments/{id}/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Appointment> {
    auth::require_admin(&headers, &state)?;

    let cancelled = state
        .scheduler
        .apply_cancellation(id, Canceller::Admin, state.scheduler.now())
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// GET /api/admin/blackouts?date=
pub async fn list_blackouts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BlackoutsQuery>,
) -> ApiResult<Vec<BlackoutSlot>> {
    auth::require_admin(&headers, &state)?;

    let slots = state
        .scheduler
        .list_blocked_slots(query.date.as_deref())
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(slots)))
}

/// POST /api/admin/blackouts — block a whole day (no `time`) or one slot.
pub async fn create_blackout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBlackoutRequest>,
) -> ApiResult<BlackoutSlot> {
    auth::require_admin(&headers, &state)?;

    let slot = state
        .scheduler
        .block_slot(&body.date, body.time.as_deref(), &body.reason)
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(slot)))
}

/// DELETE /api/admin/blackouts/{id}
pub async fn delete_blackout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<&'static str> {
    auth::require_admin(&headers, &state)?;

    state.scheduler.unblock_slot(id).await.map_err(engine_error)?;
    Ok(Json(ApiResponse::success("Блокировка снята")))
}
