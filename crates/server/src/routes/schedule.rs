use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};
use db::models::schedule::{Day, ScheduleDay, Venue, load_schedule};
use deployment::Deployment;
use services::services::talk_policy::Viewer;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::require_superuser};

/// GET /schedule/
async fn get_schedule(
    State(deployment): State<DeploymentImpl>,
) -> Result<Json<ApiResponse<Vec<ScheduleDay>>>, ApiError> {
    let schedule = load_schedule(&deployment.db().pool).await?;
    Ok(Json(ApiResponse::success(schedule)))
}

/// DELETE /schedule/days/{id}/ - refused while slots still use the day
async fn delete_day(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(day_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_superuser(&viewer)?;
    Day::delete(&deployment.db().pool, day_id).await?;
    tracing::info!("Schedule day {} deleted", day_id);
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /schedule/venues/{id}/ - refused while items still use the venue
async fn delete_venue(
    State(deployment): State<DeploymentImpl>,
    Extension(viewer): Extension<Viewer>,
    Path(venue_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_superuser(&viewer)?;
    Venue::delete(&deployment.db().pool, venue_id).await?;
    tracing::info!("Schedule venue {} deleted", venue_id);
    Ok(Json(ApiResponse::success(())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/schedule/", get(get_schedule))
        .route("/schedule/days/{day_id}/", delete(delete_day))
        .route("/schedule/venues/{venue_id}/", delete(delete_venue))
}
