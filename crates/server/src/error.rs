use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    kvpair::KvError, ref_obj::RefObjError, schedule::ScheduleError, talk::TalkError,
    user::UserError,
};
use deployment::DeploymentError;
use services::services::config::ConfigError;
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl From<TalkError> for ApiError {
    fn from(err: TalkError) -> Self {
        match err {
            TalkError::Database(e) => ApiError::Database(e),
            TalkError::NotFound => ApiError::NotFound("Talk not found".into()),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Database(e) => ApiError::Database(e),
            UserError::NotFound => ApiError::NotFound("User not found".into()),
            UserError::AlreadyExists => ApiError::Conflict("Username already taken".into()),
            UserError::UnknownPermission(name) => {
                ApiError::BadRequest(format!("Unknown permission: {name}"))
            }
            UserError::Password(e) => ApiError::InternalError(format!("Password error: {e}")),
        }
    }
}

impl From<RefObjError> for ApiError {
    fn from(err: RefObjError) -> Self {
        match err {
            RefObjError::Database(e) => ApiError::Database(e),
            RefObjError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            RefObjError::InvalidLookup(_)
            | RefObjError::InvalidValue { .. }
            | RefObjError::WrongModel { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Database(e) => ApiError::Database(e),
            KvError::RefObj(e) => ApiError::from(e),
            KvError::NotFound(_) => ApiError::NotFound(err.to_string()),
            KvError::AlreadyExists(_) | KvError::Protected(_) => ApiError::Conflict(err.to_string()),
            KvError::Validation(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Database(e) => ApiError::Database(e),
            ScheduleError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ScheduleError::Protected(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        if status_code.is_server_error() {
            tracing::error!("{}: {}", error_type, self);
        }

        let error_message = match &self {
            ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
