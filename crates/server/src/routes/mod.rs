use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{IntoMakeService, get},
};
use tower_http::cors::{Any, CorsLayer};

use crate::{DeploymentImpl, middleware as app_middleware};

pub mod auth;
pub mod health;
pub mod kvpairs;
pub mod schedule;
pub mod talks;
pub mod users;

/// Every endpoint nested under `/api`, with the viewer, request-id and CORS layers.
pub fn api_router(deployment: DeploymentImpl) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(talks::router(&deployment))
        .merge(auth::router(&deployment))
        .merge(users::router(&deployment))
        .merge(kvpairs::router(&deployment))
        .merge(schedule::router(&deployment))
        .layer(from_fn_with_state(
            deployment.clone(),
            app_middleware::attach_viewer,
        ))
        .with_state(deployment);

    Router::new()
        .nest("/api", base_routes)
        .layer(from_fn(app_middleware::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub fn router(deployment: DeploymentImpl) -> IntoMakeService<Router> {
    api_router(deployment).into_make_service()
}
