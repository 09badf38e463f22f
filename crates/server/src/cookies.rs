//! Cookie helpers: the session cookie, the CSRF token used as OAuth `state`,
//! and one-shot flash messages.

use axum::http::{HeaderMap, header};
use db::{repositories::session_repository::SESSION_LIFETIME_DAYS, services::AuthService};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub const SESSION_COOKIE: &str = "session_id";
pub const CSRF_COOKIE: &str = "csrftoken";
pub const MESSAGES_COOKIE: &str = "messages";

const SESSION_MAX_AGE: i64 = SESSION_LIFETIME_DAYS * 24 * 60 * 60;
const CSRF_MAX_AGE: i64 = 365 * 24 * 60 * 60;

/// Value of cookie `name` across every `Cookie` header of the request.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            let parts: Vec<&str> = cookie.trim().splitn(2, '=').collect();
            if parts.len() == 2 && parts[0] == name && !parts[1].is_empty() {
                Some(parts[1].to_string())
            } else {
                None
            }
        })
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token, SESSION_MAX_AGE
    )
}

pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// The request's CSRF token, or a fresh one. The flag is set when the token is
/// new and still has to be sent back with `csrf_cookie`.
pub fn csrf_token(headers: &HeaderMap) -> (String, bool) {
    match read_cookie(headers, CSRF_COOKIE) {
        Some(token) => (token, false),
        None => (AuthService::generate_csrf_token(), true),
    }
}

pub fn csrf_cookie(token: &str) -> String {
    format!(
        "{CSRF_COOKIE}={}; Path=/; SameSite=Lax; Max-Age={}",
        token, CSRF_MAX_AGE
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum FlashLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub message: String,
}

/// Pending flash messages. An unreadable cookie counts as empty.
pub fn read_flash(headers: &HeaderMap) -> Vec<FlashMessage> {
    read_cookie(headers, MESSAGES_COOKIE)
        .and_then(|raw| urlencoding::decode(&raw).ok().map(|s| s.into_owned()))
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

/// `Set-Cookie` value that appends a message to the ones already pending.
pub fn push_flash(headers: &HeaderMap, level: FlashLevel, message: impl Into<String>) -> String {
    let mut messages = read_flash(headers);
    messages.push(FlashMessage {
        level,
        message: message.into(),
    });
    flash_cookie(&messages)
}

pub fn flash_cookie(messages: &[FlashMessage]) -> String {
    if messages.is_empty() {
        return clear_cookie(MESSAGES_COOKIE);
    }
    let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{MESSAGES_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
        urlencoding::encode(&json)
    )
}
