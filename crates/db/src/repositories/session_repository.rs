// Session storage. Rows are keyed by the SHA-256 of the cookie token.
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::{models::user::User, services::AuthService};

pub const SESSION_LIFETIME_DAYS: i64 = 14;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = "id, user_id, token_hash, created_at, expires_at, last_used_at";

pub struct SessionRepository;

impl SessionRepository {
    /// Start a session for `user_id`; `token` is what goes into the cookie.
    pub async fn create(
        pool: &SqlitePool,
        token: &str,
        user_id: i64,
    ) -> Result<Session, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (user_id, token_hash, expires_at)
             VALUES (?, ?, datetime('now', 'subsec', ?))
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(AuthService::hash_session_token(token))
        .bind(format!("+{SESSION_LIFETIME_DAYS} days"))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_token(
        pool: &SqlitePool,
        token: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
              WHERE token_hash = ? AND expires_at > datetime('now', 'subsec')"
        ))
        .bind(AuthService::hash_session_token(token))
        .fetch_optional(pool)
        .await
    }

    /// Active user behind a live session token. Touches `last_used_at`.
    pub async fn find_user_by_token(
        pool: &SqlitePool,
        token: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let Some(session) = Self::find_by_token(pool, token).await? else {
            return Ok(None);
        };
        sqlx::query("UPDATE sessions SET last_used_at = datetime('now', 'subsec') WHERE id = ?")
            .bind(session.id)
            .execute(pool)
            .await?;
        let user = User::find_by_id(pool, session.user_id).await?;
        Ok(user.filter(|user| user.is_active))
    }

    pub async fn delete(pool: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(AuthService::hash_session_token(token))
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete_user_sessions(pool: &SqlitePool, user_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn cleanup_expired(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= datetime('now', 'subsec')")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
