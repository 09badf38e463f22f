use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::get,
};
use db::models::{
    talk::{CreateTalk, Talk, UpdateTalk},
    user::User,
    user_profile::UserProfile,
};
use deployment::Deployment;
use serde::Serialize;
use services::services::{
    speakers::{SPEAKERS_PER_ROW, Speaker, accepted_speakers, speaker_rows},
    talk_policy::{self, Viewer},
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::require_user};

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct AuthorSummary {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub profile_url: String,
}

impl From<&User> for AuthorSummary {
    fn from(user: &User) -> Self {
        let display_name = match user.full_name() {
            name if name.is_empty() => user.username.clone(),
            name => name,
        };
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name,
            profile_url: UserProfile::profile_path(&user.username),
        }
    }
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct TalkDetail {
    pub talk: Talk,
    pub authors: Vec<AuthorSummary>,
    pub can_edit: bool,
}

/// What the edit form needs: the current talk and a link to the person who
/// submitted it.
#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct TalkEditForm {
    pub talk: Talk,
    pub corresponding_author: Option<AuthorSummary>,
}

/// Load a talk with its author ids, or 404.
async fn load_talk(
    deployment: &DeploymentImpl,
    talk_id: i64,
) -> Result<(Talk, Vec<i64>), ApiError> {
    let pool = &deployment.db().pool;
    let talk = Talk::find_by_id(pool, talk_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Talk not found".to_string()))?;
    let author_ids = Talk::author_ids(pool, talk_id).await?;
    Ok((talk, author_ids))
}

fn ensure_editable(talk: &Talk, viewer: &Viewer, author_ids: &[i64]) -> Result<(), ApiError> {
    if talk_policy::can_edit(talk.status, viewer, author_ids) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("You may not edit this talk".to_string()))
    }
}

/// GET /talks/ - talks the viewer may list
async fn list_talks(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Json<ApiResponse<Vec<Talk>>>, ApiError> {
    let talks = talk_policy::visible_talks(&deployment.db().pool, &viewer).await?;
    Ok(Json(ApiResponse::success(talks)))
}

/// POST /talks/ - submit a talk as the logged-in user
async fn create_talk(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Json(payload): Json<CreateTalk>,
) -> Result<Json<ApiResponse<Talk>>, ApiError> {
    let user = require_user(&viewer)?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }
    let talk = Talk::create(&deployment.db().pool, &payload, user.id).await?;
    Ok(Json(ApiResponse::success(talk)))
}

/// GET /talks/{id}/
async fn get_talk(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(talk_id): Path<i64>,
) -> Result<Json<ApiResponse<TalkDetail>>, ApiError> {
    let (talk, author_ids) = load_talk(&deployment, talk_id).await?;
    if !talk_policy::can_view(talk.status, &viewer, &author_ids) {
        return Err(ApiError::Forbidden("You may not view this talk".to_string()));
    }
    let authors = Talk::authors(&deployment.db().pool, talk_id).await?;
    Ok(Json(ApiResponse::success(TalkDetail {
        can_edit: talk_policy::can_edit(talk.status, &viewer, &author_ids),
        authors: authors.iter().map(AuthorSummary::from).collect(),
        talk,
    })))
}

/// GET /talks/{id}/edit/
async fn edit_form(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(talk_id): Path<i64>,
) -> Result<Json<ApiResponse<TalkEditForm>>, ApiError> {
    let (talk, author_ids) = load_talk(&deployment, talk_id).await?;
    ensure_editable(&talk, &viewer, &author_ids)?;
    let corresponding_author = User::find_by_id(&deployment.db().pool, talk.corresponding_author_id)
        .await?
        .as_ref()
        .map(AuthorSummary::from);
    Ok(Json(ApiResponse::success(TalkEditForm {
        talk,
        corresponding_author,
    })))
}

/// POST /talks/{id}/edit/
async fn update_talk(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(talk_id): Path<i64>,
    Json(payload): Json<UpdateTalk>,
) -> Result<Json<ApiResponse<Talk>>, ApiError> {
    let (talk, author_ids) = load_talk(&deployment, talk_id).await?;
    ensure_editable(&talk, &viewer, &author_ids)?;
    if payload.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }
    let talk = Talk::update(&deployment.db().pool, talk_id, &payload).await?;
    tracing::info!("Talk {} updated by {:?}", talk_id, viewer.user_id());
    Ok(Json(ApiResponse::success(talk)))
}

/// GET /talks/speakers/ - authors of accepted talks in rows of four
async fn list_speakers(
    State(deployment): State<DeploymentImpl>,
) -> Result<Json<ApiResponse<Vec<Vec<Speaker>>>>, ApiError> {
    let speakers = accepted_speakers(&deployment.db().pool).await?;
    Ok(Json(ApiResponse::success(speaker_rows(
        &speakers,
        SPEAKERS_PER_ROW,
    ))))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/talks/", get(list_talks).post(create_talk))
        .route("/talks/speakers/", get(list_speakers))
        .route("/talks/{talk_id}/", get(get_talk))
        .route("/talks/{talk_id}/edit/", get(edit_form).post(update_talk))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use db::models::talk::TalkStatus;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{app, body_json, create_user, deployment, login_cookie, send};

    struct Fixture {
        deployment: DeploymentImpl,
        author: String,
        reviewer: String,
        superuser: String,
        stranger: String,
    }

    async fn fixture() -> Fixture {
        let deployment = deployment().await;
        let pool = &deployment.db().pool;
        let author = create_user(pool, "author", false).await;
        let reviewer = create_user(pool, "reviewer", false).await;
        User::grant_permission(pool, reviewer.id, talk_policy::VIEW_ALL_TALKS)
            .await
            .unwrap();
        let superuser = create_user(pool, "admin", true).await;
        let stranger = create_user(pool, "stranger", false).await;
        Fixture {
            author: login_cookie(pool, author.id).await,
            reviewer: login_cookie(pool, reviewer.id).await,
            superuser: login_cookie(pool, superuser.id).await,
            stranger: login_cookie(pool, stranger.id).await,
            deployment,
        }
    }

    async fn talk(deployment: &DeploymentImpl, status: TalkStatus) -> i64 {
        let pool = &deployment.db().pool;
        let author = User::find_by_username(pool, "author").await.unwrap().unwrap();
        let talk = Talk::create(
            pool,
            &CreateTalk {
                title: format!("{status:?} talk"),
                talk_abstract: String::new(),
                notes: String::new(),
            },
            author.id,
        )
        .await
        .unwrap();
        Talk::set_status(pool, talk.talk_id, status).await.unwrap();
        talk.talk_id
    }

    async fn status(deployment: &DeploymentImpl, uri: &str, cookie: Option<&str>) -> StatusCode {
        send(app(deployment), Method::GET, uri, cookie, None)
            .await
            .status()
    }

    #[tokio::test]
    async fn detail_and_edit_status_codes_follow_the_policy() {
        use TalkStatus::*;
        const OK: StatusCode = StatusCode::OK;
        const NO: StatusCode = StatusCode::FORBIDDEN;

        let f = fixture().await;
        let viewers: [(&str, Option<&str>); 5] = [
            ("anonymous", None),
            ("author", Some(f.author.as_str())),
            ("stranger", Some(f.stranger.as_str())),
            ("reviewer", Some(f.reviewer.as_str())),
            ("superuser", Some(f.superuser.as_str())),
        ];
        // (viewer, [(view, edit) for accepted, rejected, pending])
        let expected = [
            [(OK, NO), (NO, NO), (NO, NO)],
            [(OK, NO), (OK, NO), (OK, OK)],
            [(OK, NO), (NO, NO), (NO, NO)],
            [(OK, NO), (OK, NO), (OK, NO)],
            [(OK, OK), (OK, OK), (OK, OK)],
        ];

        let mut ids = Vec::new();
        for status in [Accepted, Rejected, Pending] {
            ids.push((status, talk(&f.deployment, status).await));
        }

        for ((name, cookie), row) in viewers.into_iter().zip(expected) {
            for ((talk_status, id), (view, edit)) in ids.iter().zip(row) {
                assert_eq!(
                    status(&f.deployment, &format!("/api/talks/{id}/"), cookie).await,
                    view,
                    "{name} viewing {talk_status:?}"
                );
                assert_eq!(
                    status(&f.deployment, &format!("/api/talks/{id}/edit/"), cookie).await,
                    edit,
                    "{name} editing {talk_status:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn missing_talks_are_not_found() {
        let f = fixture().await;
        assert_eq!(
            status(&f.deployment, "/api/talks/999/", Some(f.superuser.as_str())).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn listing_depends_on_view_all() {
        let f = fixture().await;
        talk(&f.deployment, TalkStatus::Accepted).await;
        talk(&f.deployment, TalkStatus::Pending).await;

        let listings = [
            (None, 1),
            (Some(f.author.as_str()), 1),
            (Some(f.reviewer.as_str()), 2),
        ];
        for (cookie, expected) in listings {
            let response =
                send(app(&f.deployment), Method::GET, "/api/talks/", cookie, None).await;
            let body = body_json(response).await;
            assert_eq!(body["data"].as_array().unwrap().len(), expected);
        }
    }

    #[tokio::test]
    async fn edit_form_links_the_corresponding_author() {
        let f = fixture().await;
        let id = talk(&f.deployment, TalkStatus::Pending).await;
        let response = send(
            app(&f.deployment),
            Method::GET,
            &format!("/api/talks/{id}/edit/"),
            Some(f.author.as_str()),
            None,
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["data"]["corresponding_author"]["username"], "author");
        assert_eq!(
            body["data"]["corresponding_author"]["profile_url"],
            "/users/author/"
        );
    }

    #[tokio::test]
    async fn authors_update_pending_talks_only() {
        let f = fixture().await;
        let id = talk(&f.deployment, TalkStatus::Pending).await;
        let uri = format!("/api/talks/{id}/edit/");

        let response = send(
            app(&f.deployment),
            Method::POST,
            &uri,
            Some(f.author.as_str()),
            Some(json!({"title": "Rewritten"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["title"], "Rewritten");

        let pool = &f.deployment.db().pool;
        Talk::set_status(pool, id, TalkStatus::Accepted).await.unwrap();
        let response = send(
            app(&f.deployment),
            Method::POST,
            &uri,
            Some(f.author.as_str()),
            Some(json!({"title": "Too late"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn submitting_requires_a_session() {
        let f = fixture().await;
        let payload = json!({"title": "Packaging Rust", "abstract": "crates"});

        let response = send(
            app(&f.deployment),
            Method::POST,
            "/api/talks/",
            None,
            Some(payload.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            app(&f.deployment),
            Method::POST,
            "/api/talks/",
            Some(f.stranger.as_str()),
            Some(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["abstract"], "crates");
    }

    #[tokio::test]
    async fn speakers_come_in_rows_of_four() {
        let f = fixture().await;
        let pool = &f.deployment.db().pool;
        for n in 0..5 {
            let user = create_user(pool, &format!("speaker{n}"), false).await;
            let talk = Talk::create(
                pool,
                &CreateTalk {
                    title: format!("Talk {n}"),
                    talk_abstract: String::new(),
                    notes: String::new(),
                },
                user.id,
            )
            .await
            .unwrap();
            Talk::set_status(pool, talk.talk_id, TalkStatus::Accepted).await.unwrap();
        }

        let response = send(
            app(&f.deployment),
            Method::GET,
            "/api/talks/speakers/",
            None,
            None,
        )
        .await;
        let body = body_json(response).await;
        let rows: Vec<usize> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_array().unwrap().len())
            .collect();
        assert_eq!(rows, vec![4, 1]);
    }
}
