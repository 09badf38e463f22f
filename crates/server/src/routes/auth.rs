//! Password and single-sign-on login.
//!
//! SSO failures never surface as HTTP errors: the reason is queued as a flash
//! message and the browser is sent back to the login page without a session.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, header},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use db::{
    models::{user::User, user_profile::UserProfile},
    repositories::SessionRepository,
    services::AuthService,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::sso::SsoError;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    cookies::{
        CSRF_COOKIE, FlashLevel, SESSION_COOKIE, clear_cookie, csrf_cookie, csrf_token,
        push_flash, read_cookie, session_cookie,
    },
    error::ApiError,
    middleware::access_control::session_token,
};

pub const LOGIN_PAGE: &str = "/login/";

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct LoginResponse {
    pub user: User,
    pub profile_url: String,
}

#[derive(Debug, Deserialize)]
pub struct GitHubCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn redirect_with_cookies(location: &str, cookies: Vec<String>) -> Response {
    let headers: Vec<(HeaderName, String)> = cookies
        .into_iter()
        .map(|cookie| (header::SET_COOKIE, cookie))
        .collect();
    (AppendHeaders(headers), Redirect::to(location)).into_response()
}

/// Flash the error and send the browser back to the login page.
fn sso_failure(headers: &HeaderMap, provider: &str, err: SsoError) -> Response {
    tracing::warn!("{} login failed: {}", provider, err);
    let flash = push_flash(headers, FlashLevel::Error, err.to_string());
    redirect_with_cookies(LOGIN_PAGE, vec![flash])
}

/// Open a session for `user` and redirect to their profile.
async fn sso_success(deployment: &DeploymentImpl, user: &User) -> Result<Response, ApiError> {
    let token = AuthService::generate_session_id();
    SessionRepository::create(&deployment.db().pool, &token, user.id).await?;
    tracing::info!("User {} logged in through SSO", user.username);
    Ok(redirect_with_cookies(
        &format!("/api{}", UserProfile::profile_path(&user.username)),
        vec![session_cookie(&token)],
    ))
}

/// Absolute URL GitHub should send the browser back to.
fn github_redirect_uri(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}/api/login/github/")
}

/// POST /login/
async fn login(
    State(deployment): State<DeploymentImpl>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let pool = &deployment.db().pool;
    let user = User::find_by_username(pool, &req.username)
        .await?
        .filter(|user| user.is_active && user.verify_password(&req.password))
        .ok_or_else(|| ApiError::BadRequest("Invalid credentials".to_string()))?;

    User::touch_last_login(pool, user.id).await?;
    let token = AuthService::generate_session_id();
    SessionRepository::create(pool, &token, user.id).await?;
    tracing::info!("User {} logged in", user.username);

    let response = LoginResponse {
        profile_url: UserProfile::profile_path(&user.username),
        user,
    };
    Ok((
        [(header::SET_COOKIE, session_cookie(&token))],
        Json(ApiResponse::<LoginResponse>::success(response)),
    )
        .into_response())
}

/// POST /logout/
async fn logout(
    State(deployment): State<DeploymentImpl>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        SessionRepository::delete(&deployment.db().pool, &token).await?;
    }
    Ok((
        [(header::SET_COOKIE, clear_cookie(SESSION_COOKIE))],
        Json(ApiResponse::<()>::success(())),
    )
        .into_response())
}

/// GET /login/github/ - both legs of the OAuth flow
async fn github_login(
    State(deployment): State<DeploymentImpl>,
    headers: HeaderMap,
    Query(callback): Query<GitHubCallback>,
) -> Result<Response, ApiError> {
    let Some(github) = deployment.github_sso().await else {
        return Err(ApiError::NotFound("GitHub login is not enabled".to_string()));
    };

    if let Some(error) = callback.error {
        let reason = callback.error_description.unwrap_or(error);
        return Ok(sso_failure(&headers, "GitHub", SsoError::Provider(reason)));
    }

    let Some(code) = callback.code else {
        let (state, fresh) = csrf_token(&headers);
        let url = github.authorize_url(&github_redirect_uri(&headers), &state);
        let cookies = if fresh { vec![csrf_cookie(&state)] } else { vec![] };
        return Ok(redirect_with_cookies(&url, cookies));
    };

    let expected = read_cookie(&headers, CSRF_COOKIE);
    if expected.is_none() || callback.state != expected {
        return Ok(sso_failure(&headers, "GitHub", SsoError::InvalidState));
    }

    let registration_open = deployment.registration_open().await;
    match github
        .login(&deployment.db().pool, &code, registration_open)
        .await
    {
        Ok(user) => sso_success(&deployment, &user).await,
        Err(err) => Ok(sso_failure(&headers, "GitHub", err)),
    }
}

/// GET /login/debian/ - trust the username the SSO proxy put in the request
async fn debian_login(
    State(deployment): State<DeploymentImpl>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some(debian) = deployment.debian_sso().await else {
        return Err(ApiError::NotFound("Debian login is not enabled".to_string()));
    };

    let asserted = headers
        .get(debian.username_header())
        .and_then(|h| h.to_str().ok());
    let registration_open = deployment.registration_open().await;
    match debian
        .login(&deployment.db().pool, asserted, registration_open)
        .await
    {
        Ok(user) => sso_success(&deployment, &user).await,
        Err(err) => Ok(sso_failure(&headers, "Debian", err)),
    }
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/login/", post(login))
        .route("/logout/", post(logout))
        .route("/login/github/", get(github_login))
        .route("/login/debian/", get(debian_login))
}
