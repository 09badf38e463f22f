use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use db::{
    DBService,
    models::user::{CreateUser, User},
    repositories::SessionRepository,
    services::AuthService,
};
use services::services::config::Config;
use sqlx::SqlitePool;
use tower::ServiceExt;

use crate::{DeploymentImpl, cookies::SESSION_COOKIE, routes};

pub(crate) async fn deployment() -> DeploymentImpl {
    deployment_with(Config::default()).await
}

pub(crate) async fn deployment_with(config: Config) -> DeploymentImpl {
    let db = DBService::new_in_memory()
        .await
        .expect("failed to open sqlite memory db");
    DeploymentImpl::with_db(db, config)
}

/// Password is `<username>_password`.
pub(crate) async fn create_user(pool: &SqlitePool, username: &str, is_superuser: bool) -> User {
    User::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: Some(format!("{username}_password")),
            first_name: String::new(),
            last_name: String::new(),
            is_superuser,
        },
    )
    .await
    .expect("failed to create test user")
}

/// `Cookie` header value for a fresh session of `user_id`.
pub(crate) async fn login_cookie(pool: &SqlitePool, user_id: i64) -> String {
    let token = AuthService::generate_session_id();
    SessionRepository::create(pool, &token, user_id)
        .await
        .expect("failed to create session");
    format!("{SESSION_COOKIE}={token}")
}

pub(crate) fn app(deployment: &DeploymentImpl) -> Router {
    routes::api_router(deployment.clone())
}

pub(crate) async fn send(
    app: Router,
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(request.body(body).unwrap()).await.unwrap()
}

pub(crate) async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Every `Set-Cookie` header of the response.
pub(crate) fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}
