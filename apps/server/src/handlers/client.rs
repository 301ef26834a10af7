use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use salon_engine::{Appointment, BookingDraft, Canceller};
use std::sync::Arc;

use crate::{
    auth,
    models::*,
    AppState,
};

/// Loads an appointment and checks it belongs to `client`. Someone else's
/// appointment looks exactly like a missing one.
async fn owned_appointment(state: &AppState, id: i64, client: &TelegramUser) -> Result<Appointment, ApiError> {
    let appointment = state.scheduler.appointment(id).await.map_err(engine_error)?;
    if appointment.client_ref != client.id {
        return Err(api_error(StatusCode::NOT_FOUND, "Запись не найдена"));
    }
    Ok(appointment)
}

/// GET /api/dates — date labels open for booking.
pub async fn available_dates(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    let dates = state.scheduler.bookable_dates().await.map_err(engine_error)?;
    Ok(Json(ApiResponse::success(
        dates.iter().map(ToString::to_string).collect(),
    )))
}

/// GET /api/slots?date=Пн 02.03 — bookable times on one date.
pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<SlotsResponse> {
    let times = state
        .scheduler
        .resolve_availability(&query.date)
        .await
        .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(SlotsResponse {
        date: query.date,
        times,
    })))
}

/// POST /api/appointments — place a hold awaiting prepayment.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAppointmentRequest>,
) -> ApiResult<CreatedAppointment> {
    let user = auth::require_user(&headers, &state)?;

    let draft = BookingDraft::new(user.id)
        .with_date(body.date)
        .with_time(body.time)
        .with_name(body.name)
        .with_phone(body.phone);

    let id = state.scheduler.reserve(&draft).await.map_err(engine_error)?;

    Ok(Json(ApiResponse::success(CreatedAppointment {
        id,
        payment_window_minutes: state.scheduler.config().payment_window.num_minutes(),
    })))
}

/// GET /api/appointments/my — the caller's active appointments, soonest first.
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<AppointmentView>> {
    let user = auth::require_user(&headers, &state)?;

    let appointments = state
        .scheduler
        .client_appointments(user.id)
        .await
        .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(
        appointments.into_iter().map(AppointmentView::from).collect(),
    )))
}

/// GET /api/appointments/{id}/cancellation — what cancelling now would mean.
pub async fn cancellation_outcome(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<CancellationResponse> {
    let user = auth::require_user(&headers, &state)?;
    owned_appointment(&state, id, &user).await?;

    let outcome = state
        .scheduler
        .request_cancellation(id, state.scheduler.now())
        .await
        .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(CancellationResponse {
        appointment_id: id,
        outcome,
        message: cancellation_message(outcome),
    })))
}

/// POST /api/appointments/{id}/cancel — accept the outcome and cancel.
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<AppointmentView> {
    let user = auth::require_user(&headers, &state)?;
    owned_appointment(&state, id, &user).await?;

    let cancelled = state
        .scheduler
        .apply_cancellation(id, Canceller::Client, state.scheduler.now())
        .await
        .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(cancelled.into())))
}
