use axum::{http::StatusCode, Json};
use salon_engine::{Appointment, CancellationOutcome, EngineError};
use serde::{Deserialize, Serialize};

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub date: String,
    pub time: String,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub date: String,
    pub times: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedAppointment {
    pub id: i64,
    /// Minutes the client has to pay before the hold is released.
    pub payment_window_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub appointment_id: i64,
    pub outcome: CancellationOutcome,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AdminAppointmentsQuery {
    pub date: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlackoutsQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlackoutRequest {
    pub date: String,
    /// Omit to block the whole day.
    pub time: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg)))
}

/// Maps engine failures onto HTTP statuses with a user-facing message.
pub fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::InvalidDateFormat(_)
        | EngineError::InvalidTimeFormat(_)
        | EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::SlotNoLongerAvailable { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::PreconditionFailed { .. } => StatusCode::CONFLICT,
        EngineError::NotFound(_) | EngineError::BlackoutNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::CancellationDenied(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Database(_) | EngineError::CorruptRecord { .. } => {
            tracing::error!("Engine failure: {}", e);
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "DB error");
        }
    };

    let message = match &e {
        EngineError::SlotNoLongerAvailable { .. } => "Это время уже занято, выберите другое".to_string(),
        EngineError::NotFound(_) => "Запись не найдена".to_string(),
        EngineError::CancellationDenied(outcome) => cancellation_message(*outcome).to_string(),
        other => other.to_string(),
    };
    api_error(status, message)
}

/// Text shown to a client who asked to cancel.
pub fn cancellation_message(outcome: CancellationOutcome) -> &'static str {
    match outcome {
        CancellationOutcome::CancelImmediately => "Вы уверены, что хотите отменить запись?",
        CancellationOutcome::RequireDoubleConfirm => {
            "До записи осталось менее 24 часов. При отмене предоплата не возвращается. \
             Вы уверены, что хотите отменить запись?"
        }
        CancellationOutcome::RequireProviderContact => {
            "Для возврата предоплаты необходимо написать мастеру."
        }
        CancellationOutcome::Refuse => "Эту запись уже нельзя отменить.",
    }
}

/// Client-facing view of an appointment (no internal flags).
#[derive(Debug, Serialize)]
pub struct AppointmentView {
    pub id: i64,
    pub date: String,
    pub time: String,
    pub name: String,
    pub phone: String,
    pub status: salon_engine::Status,
    pub payment_status: salon_engine::PaymentStatus,
    pub created_at: String,
}

impl From<Appointment> for AppointmentView {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            date: a.date_label,
            time: a.time_label,
            name: a.client_name,
            phone: a.client_phone,
            status: a.status,
            payment_status: a.payment_status,
            created_at: a.created_at,
        }
    }
}

// ── Telegram auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}
