use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use db::{models::user::User, repositories::SessionRepository};
use deployment::Deployment;
use services::services::talk_policy::Viewer;

use crate::{
    DeploymentImpl,
    cookies::{SESSION_COOKIE, read_cookie},
    error::ApiError,
};

/// Session token from the `session_id` cookie, else from `Authorization: Bearer`.
pub fn session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    read_cookie(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Resolve the requesting user and their permissions. Missing, expired or
/// unknown tokens and inactive accounts all yield an anonymous viewer.
pub async fn get_current_viewer(
    deployment: &DeploymentImpl,
    token: Option<&str>,
) -> Result<Viewer, ApiError> {
    let Some(token) = token else {
        return Ok(Viewer::anonymous());
    };
    let pool = &deployment.db().pool;
    match SessionRepository::find_user_by_token(pool, token).await? {
        Some(user) => Ok(Viewer::load(pool, user).await?),
        None => Ok(Viewer::anonymous()),
    }
}

/// Insert the request's [`Viewer`] as an extension for every handler.
pub async fn attach_viewer(
    State(deployment): State<DeploymentImpl>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers());
    let viewer = get_current_viewer(&deployment, token.as_deref()).await?;
    if let Some(user) = &viewer.user {
        tracing::debug!(user_id = user.id, "Authenticated request");
    }
    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

/// The logged-in user, or 401.
pub fn require_user(viewer: &Viewer) -> Result<&User, ApiError> {
    viewer
        .user
        .as_ref()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
}

/// The logged-in superuser, or 401/403.
pub fn require_superuser(viewer: &Viewer) -> Result<&User, ApiError> {
    let user = require_user(viewer)?;
    if !viewer.is_superuser() {
        return Err(ApiError::Forbidden("Superuser access required".to_string()));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension, Router,
        body::Body,
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::test_utils::{create_user, deployment, login_cookie};

    fn app(deployment: DeploymentImpl) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(viewer): Extension<Viewer>| async move {
                    viewer
                        .user
                        .map(|u| u.username)
                        .unwrap_or_else(|| "anonymous".to_string())
                }),
            )
            .layer(from_fn_with_state(deployment.clone(), attach_viewer))
            .with_state(deployment)
    }

    async fn whoami(deployment: &DeploymentImpl, cookie: Option<&str>) -> String {
        let mut request = Request::builder().uri("/whoami");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let response = app(deployment.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn bearer_token_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(session_token(&headers).as_deref(), Some("tok"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session_id=cookie"));
        assert_eq!(session_token(&headers).as_deref(), Some("cookie"));
    }

    #[tokio::test]
    async fn sessions_resolve_to_active_users_only() {
        let deployment = deployment().await;
        let pool = &deployment.db().pool;
        let ada = create_user(pool, "ada", false).await;
        let cookie = login_cookie(pool, ada.id).await;

        assert_eq!(whoami(&deployment, None).await, "anonymous");
        assert_eq!(whoami(&deployment, Some("session_id=bogus")).await, "anonymous");
        assert_eq!(whoami(&deployment, Some(cookie.as_str())).await, "ada");

        User::set_active(pool, ada.id, false).await.unwrap();
        assert_eq!(whoami(&deployment, Some(cookie.as_str())).await, "anonymous");
    }

    #[test]
    fn superuser_guard() {
        assert!(matches!(
            require_superuser(&Viewer::anonymous()),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
