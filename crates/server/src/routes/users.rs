use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use db::models::{
    talk::Talk,
    user::User,
    user_profile::{UserProfile, avatar_url},
};
use deployment::Deployment;
use serde::Serialize;
use services::services::talk_policy::{self, Viewer};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    cookies::{FlashMessage, flash_cookie, read_flash},
    error::ApiError,
    routes::talks::AuthorSummary,
};

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct PublicProfile {
    pub user: AuthorSummary,
    pub avatar_url: Option<String>,
    pub profile: Option<UserProfile>,
    pub talks: Vec<Talk>,
}

/// GET /profile/ - the viewer's own profile, or the site index when anonymous
async fn my_profile(Extension(viewer): Extension<Viewer>) -> Redirect {
    match &viewer.user {
        Some(user) => Redirect::to(&format!(
            "/api{}",
            UserProfile::profile_path(&user.username)
        )),
        None => Redirect::to("/"),
    }
}

/// GET /users/{username}/
async fn public_profile(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<PublicProfile>>, ApiError> {
    let pool = &deployment.db().pool;
    let user = User::find_by_username(pool, &username)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let mut talks = Vec::new();
    for talk in Talk::list_for_author(pool, user.id).await? {
        let author_ids = Talk::author_ids(pool, talk.talk_id).await?;
        if talk_policy::can_view(talk.status, &viewer, &author_ids) {
            talks.push(talk);
        }
    }

    Ok(Json(ApiResponse::success(PublicProfile {
        avatar_url: avatar_url(&user.email),
        profile: UserProfile::find_by_user_id(pool, user.id).await?,
        user: AuthorSummary::from(&user),
        talks,
    })))
}

/// GET /messages/ - pending flash messages, cleared once read
async fn messages(headers: HeaderMap) -> Response {
    let pending: Vec<FlashMessage> = read_flash(&headers);
    (
        [(header::SET_COOKIE, flash_cookie(&[]))],
        Json(ApiResponse::<Vec<FlashMessage>>::success(pending)),
    )
        .into_response()
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/profile/", get(my_profile))
        .route("/users/{username}/", get(public_profile))
        .route("/messages/", get(messages))
}
