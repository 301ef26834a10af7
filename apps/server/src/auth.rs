use axum::http::{header, HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::{
    models::{api_error, ApiError, TelegramUser},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of initData before it's considered expired (24 hours).
const MAX_AUTH_AGE_SECS: i64 = 86400;

/// Validates Telegram Mini App initData and extracts user info.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str, now_unix: i64) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    // Replay protection
    if let Some(auth_date) = params.get("auth_date").and_then(|d| d.parse::<i64>().ok()) {
        if now_unix - auth_date > MAX_AUTH_AGE_SECS {
            tracing::warn!("initData expired: auth_date={}, age={}s", auth_date, now_unix - auth_date);
            return None;
        }
    }

    if sign_init_data(&params, bot_token)? != *hash {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    let user_json = params.get("user")?;
    serde_json::from_str::<TelegramUser>(user_json).ok()
}

/// Hex HMAC of the data-check-string (sorted `key=value` lines, hash excluded).
fn sign_init_data(params: &BTreeMap<String, String>, bot_token: &str) -> Option<String> {
    let data_check_string = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    // secret_key = HMAC-SHA256("WebAppData", bot_token)
    let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").ok()?;
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).ok()?;
    mac.update(data_check_string.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Extract Telegram user from the Authorization header.
/// Header format: `tma <initData>`
pub fn extract_user_from_header(auth_header: &str, bot_token: &str) -> Option<TelegramUser> {
    let init_data = auth_header.strip_prefix("tma ")?;
    validate_init_data(init_data, bot_token, chrono::Utc::now().timestamp())
}

/// The authenticated client behind a request.
pub fn require_user(headers: &HeaderMap, state: &AppState) -> Result<TelegramUser, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

    extract_user_from_header(auth_header, &state.bot_token)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid Telegram auth"))
}

/// Like [`require_user`], but only the provider passes.
pub fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<TelegramUser, ApiError> {
    let user = require_user(headers, state)?;
    if !is_admin(&user, state.admin_tg_id) {
        return Err(api_error(StatusCode::FORBIDDEN, "Доступ запрещён"));
    }
    Ok(user)
}

pub fn is_admin(user: &TelegramUser, admin_tg_id: i64) -> bool {
    user.id == admin_tg_id
}
