use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get},
};
use db::models::{
    content_type::ModelKind,
    kvpair::{CreateKey, CreateKeyValuePair, Key, KeyValuePair, KeyValuePairView, KvFilter},
    ref_obj::{RefLookup, RefObject},
    schedule::{Day, Venue},
    talk::Talk,
    user::{Group, User},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::talk_policy::{self, Viewer};
use sqlx::SqlitePool;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl, error::ApiError, middleware::require_user, routes::talks::AuthorSummary,
};

/// Query-string name of the reference field.
const REF_OBJ_PARAM: &str = "ref_obj";

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub model: Option<ModelKind>,
}

/// A decoded reference as shown to API clients. Users are reduced to their
/// public summary.
#[derive(Debug, Serialize, TS)]
#[serde(tag = "model", content = "object", rename_all = "snake_case")]
#[ts(export)]
pub enum RefObjectView {
    User(AuthorSummary),
    Group(Group),
    Talk(Talk),
    Venue(Venue),
    Day(Day),
    Key(Key),
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct KeyValuePairDetail {
    pub pair: KeyValuePairView,
    pub ref_obj: RefObjectView,
}

async fn talk_visible(pool: &SqlitePool, viewer: &Viewer, talk: &Talk) -> Result<bool, ApiError> {
    let author_ids = Talk::author_ids(pool, talk.talk_id).await?;
    Ok(talk_policy::can_view(talk.status, viewer, &author_ids))
}

/// Whether the pair points at a talk the viewer may not see.
async fn hides_talk(pool: &SqlitePool, viewer: &Viewer, pair: &KeyValuePair) -> Result<bool, ApiError> {
    if pair.ref_obj.related_model() != Some(ModelKind::Talk) {
        return Ok(false);
    }
    match Talk::find_by_id(pool, pair.ref_obj.raw()).await? {
        Some(talk) => Ok(!talk_visible(pool, viewer, &talk).await?),
        None => Ok(false),
    }
}

/// Keys and their pairs are managed by the key's owner or a superuser.
fn ensure_key_manager(key: &Key, user: &User, viewer: &Viewer) -> Result<(), ApiError> {
    if key.owner_id == user.id || viewer.is_superuser() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Only the owner of key {} may change it",
            key.name
        )))
    }
}

async fn find_key(pool: &SqlitePool, key_id: i64) -> Result<Key, ApiError> {
    Key::find_by_id(pool, key_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Key not found".to_string()))
}

/// Build a pair filter from `key`, `ref_obj` and `ref_obj__<lookup>` parameters.
/// Unrelated parameters are ignored.
pub fn parse_pair_filter(params: &[(String, String)]) -> Result<KvFilter, ApiError> {
    let mut filter = KvFilter::default();
    for (name, raw) in params {
        if name == "key" {
            let key_id = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid key id: {raw}")))?;
            filter.key_id = Some(key_id);
        } else if let Some(lookup) = RefLookup::from_param(REF_OBJ_PARAM, name, raw)? {
            filter.ref_obj.push(lookup);
        }
    }
    Ok(filter)
}

/// GET /kvpairs/keys/
async fn list_keys(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<ApiResponse<Vec<Key>>>, ApiError> {
    let pool = &deployment.db().pool;
    let keys = match query.model {
        Some(kind) => Key::list_for_model(pool, kind).await?,
        None => Key::list_all(pool).await?,
    };
    Ok(Json(ApiResponse::success(keys)))
}

/// POST /kvpairs/keys/ - the caller becomes the owner
async fn create_key(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Json(payload): Json<CreateKey>,
) -> Result<Json<ApiResponse<Key>>, ApiError> {
    let user = require_user(&viewer)?;
    let key = Key::create(&deployment.db().pool, &payload, user.id).await?;
    Ok(Json(ApiResponse::success(key)))
}

/// DELETE /kvpairs/keys/{id}/ - owner or superuser; refused while pairs use the key
async fn delete_key(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(key_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&viewer)?;
    let pool = &deployment.db().pool;
    let key = find_key(pool, key_id).await?;
    ensure_key_manager(&key, user, &viewer)?;
    Key::delete(pool, key_id).await?;
    tracing::info!("Key {} ({}) deleted by {}", key.id, key.name, user.username);
    Ok(Json(ApiResponse::success(())))
}

/// GET /kvpairs/pairs/?key=&ref_obj=&ref_obj__isnull= - pairs on hidden talks are left out
async fn list_pairs(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<ApiResponse<Vec<KeyValuePairView>>>, ApiError> {
    let filter = parse_pair_filter(&params)?;
    let pool = &deployment.db().pool;
    let mut visible = Vec::new();
    for pair in KeyValuePair::filter(pool, &filter).await? {
        if !hides_talk(pool, &viewer, &pair).await? {
            visible.push(pair.view());
        }
    }
    Ok(Json(ApiResponse::success(visible)))
}

/// POST /kvpairs/pairs/ - key owner or superuser
async fn create_pair(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Json(payload): Json<CreateKeyValuePair>,
) -> Result<Json<ApiResponse<KeyValuePairView>>, ApiError> {
    let user = require_user(&viewer)?;
    let pool = &deployment.db().pool;
    let key = find_key(pool, payload.key_id).await?;
    ensure_key_manager(&key, user, &viewer)?;
    let pair = KeyValuePair::create(pool, &payload).await?;
    Ok(Json(ApiResponse::success(pair.view())))
}

/// GET /kvpairs/pairs/{id}/ - the pair with its decoded reference
async fn get_pair(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(pair_id): Path<i64>,
) -> Result<Json<ApiResponse<KeyValuePairDetail>>, ApiError> {
    let pool = &deployment.db().pool;
    let mut pair = KeyValuePair::find_by_id(pool, pair_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("KeyValuePair not found".to_string()))?;
    let ref_obj = match pair.ref_object(pool).await?.clone() {
        RefObject::Talk(talk) => {
            if !talk_visible(pool, &viewer, &talk).await? {
                return Err(ApiError::Forbidden("You may not view this talk".to_string()));
            }
            RefObjectView::Talk(talk)
        }
        RefObject::User(user) => RefObjectView::User(AuthorSummary::from(&user)),
        RefObject::Group(group) => RefObjectView::Group(group),
        RefObject::Venue(venue) => RefObjectView::Venue(venue),
        RefObject::Day(day) => RefObjectView::Day(day),
        RefObject::Key(key) => RefObjectView::Key(key),
    };
    Ok(Json(ApiResponse::success(KeyValuePairDetail {
        pair: pair.view(),
        ref_obj,
    })))
}

/// DELETE /kvpairs/pairs/{id}/ - key owner or superuser
async fn delete_pair(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(pair_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&viewer)?;
    let pool = &deployment.db().pool;
    let pair = KeyValuePair::find_by_id(pool, pair_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("KeyValuePair not found".to_string()))?;
    let key = find_key(pool, pair.key_id).await?;
    ensure_key_manager(&key, user, &viewer)?;
    KeyValuePair::delete(pool, pair_id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/kvpairs/keys/", get(list_keys).post(create_key))
        .route("/kvpairs/keys/{key_id}/", delete(delete_key))
        .route("/kvpairs/pairs/", get(list_pairs).post(create_pair))
        .route("/kvpairs/pairs/{pair_id}/", get(get_pair).delete(delete_pair))
}
