use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;

use super::user::User;

#[derive(Debug, Error)]
pub enum TalkError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Talk not found")]
    NotFound,
}

/// Review state of a submission. Stored as a single letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize, TS)]
#[sqlx(type_name = "TEXT")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum TalkStatus {
    #[sqlx(rename = "P")]
    Pending,
    #[sqlx(rename = "A")]
    Accepted,
    #[sqlx(rename = "R")]
    Rejected,
}

impl TalkStatus {
    pub const ALL: [TalkStatus; 3] = [
        TalkStatus::Pending,
        TalkStatus::Accepted,
        TalkStatus::Rejected,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Talk {
    pub talk_id: i64,
    pub title: String,
    #[sqlx(rename = "abstract")]
    #[serde(rename = "abstract")]
    pub talk_abstract: String,
    pub notes: String,
    pub status: TalkStatus,
    pub corresponding_author_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateTalk {
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub talk_abstract: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct UpdateTalk {
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub talk_abstract: Option<String>,
    pub notes: Option<String>,
}

const TALK_COLUMNS: &str =
    "talk_id, title, abstract, notes, status, corresponding_author_id, created_at";

impl Talk {
    /// Submit a pending talk; the submitter becomes corresponding author and first author.
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateTalk,
        corresponding_author_id: i64,
    ) -> Result<Self, TalkError> {
        let mut tx = pool.begin().await?;
        let talk = sqlx::query_as::<_, Talk>(&format!(
            "INSERT INTO talks (title, abstract, notes, status, corresponding_author_id)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {TALK_COLUMNS}"
        ))
        .bind(&data.title)
        .bind(&data.talk_abstract)
        .bind(&data.notes)
        .bind(TalkStatus::Pending)
        .bind(corresponding_author_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO talk_authors (talk_id, user_id) VALUES (?, ?)")
            .bind(talk.talk_id)
            .bind(corresponding_author_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Talk {} submitted by user {}", talk.talk_id, corresponding_author_id);
        Ok(talk)
    }

    pub async fn find_by_id(pool: &SqlitePool, talk_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Talk>(&format!(
            "SELECT {TALK_COLUMNS} FROM talks WHERE talk_id = ?"
        ))
        .bind(talk_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Talk>(&format!("SELECT {TALK_COLUMNS} FROM talks ORDER BY talk_id"))
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_status(
        pool: &SqlitePool,
        status: TalkStatus,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Talk>(&format!(
            "SELECT {TALK_COLUMNS} FROM talks WHERE status = ? ORDER BY talk_id"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Talks the user is an author of, any status.
    pub async fn list_for_author(pool: &SqlitePool, user_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Talk>(
            r#"SELECT t.talk_id, t.title, t.abstract, t.notes, t.status,
                      t.corresponding_author_id, t.created_at
                 FROM talks t
                 JOIN talk_authors ta ON ta.talk_id = t.talk_id
                WHERE ta.user_id = ?
                ORDER BY t.talk_id"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(
        pool: &SqlitePool,
        talk_id: i64,
        status: TalkStatus,
    ) -> Result<Self, TalkError> {
        sqlx::query_as::<_, Talk>(&format!(
            "UPDATE talks SET status = ? WHERE talk_id = ? RETURNING {TALK_COLUMNS}"
        ))
        .bind(status)
        .bind(talk_id)
        .fetch_optional(pool)
        .await?
        .ok_or(TalkError::NotFound)
    }

    pub async fn update(
        pool: &SqlitePool,
        talk_id: i64,
        data: &UpdateTalk,
    ) -> Result<Self, TalkError> {
        sqlx::query_as::<_, Talk>(&format!(
            "UPDATE talks SET
                 title    = COALESCE(?, title),
                 abstract = COALESCE(?, abstract),
                 notes    = COALESCE(?, notes)
              WHERE talk_id = ?
              RETURNING {TALK_COLUMNS}"
        ))
        .bind(&data.title)
        .bind(&data.talk_abstract)
        .bind(&data.notes)
        .bind(talk_id)
        .fetch_optional(pool)
        .await?
        .ok_or(TalkError::NotFound)
    }

    pub async fn delete(pool: &SqlitePool, talk_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM talks WHERE talk_id = ?")
            .bind(talk_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn add_author(pool: &SqlitePool, talk_id: i64, user_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO talk_authors (talk_id, user_id) VALUES (?, ?)")
            .bind(talk_id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn author_ids(pool: &SqlitePool, talk_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT user_id FROM talk_authors WHERE talk_id = ? ORDER BY user_id")
            .bind(talk_id)
            .fetch_all(pool)
            .await
    }

    pub async fn authors(pool: &SqlitePool, talk_id: i64) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"SELECT u.id, u.username, u.email, u.password_hash, u.first_name, u.last_name,
                      u.is_active, u.is_staff, u.is_superuser, u.date_joined, u.last_login
                 FROM users u
                 JOIN talk_authors ta ON ta.user_id = u.id
                WHERE ta.talk_id = ?
                ORDER BY u.id"#,
        )
        .bind(talk_id)
        .fetch_all(pool)
        .await
    }

    /// Distinct authors of accepted talks, in registration order.
    pub async fn accepted_speakers(pool: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"SELECT DISTINCT u.id, u.username, u.email, u.password_hash, u.first_name,
                      u.last_name, u.is_active, u.is_staff, u.is_superuser, u.date_joined,
                      u.last_login
                 FROM users u
                 JOIN talk_authors ta ON ta.user_id = u.id
                 JOIN talks t ON t.talk_id = ta.talk_id
                WHERE t.status = ?
                ORDER BY u.id"#,
        )
        .bind(TalkStatus::Accepted)
        .fetch_all(pool)
        .await
    }
}
