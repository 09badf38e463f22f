use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

use super::user::User;

const AVATAR_BASE: &str = "https://www.gravatar.com/avatar/";

/// Supplementary per-user data, one row per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct UserProfile {
    pub id: i64,
    pub user_id: i64,
    pub contact_number: Option<String>,
    pub bio: Option<String>,
    pub homepage: Option<String>,
    pub twitter_handle: Option<String>,
    pub github_username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct UpdateUserProfile {
    pub contact_number: Option<String>,
    pub bio: Option<String>,
    pub homepage: Option<String>,
    pub twitter_handle: Option<String>,
    pub github_username: Option<String>,
}

/// Avatar image URL keyed on the normalised e-mail address, `None` without one.
pub fn avatar_url(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return None;
    }
    let digest = Sha256::digest(email.as_bytes());
    Some(format!("{AVATAR_BASE}{}?d=identicon", hex::encode(digest)))
}

impl UserProfile {
    pub fn profile_path(username: &str) -> String {
        format!("/users/{username}/")
    }

    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserProfile>(
            "SELECT id, user_id, contact_number, bio, homepage, twitter_handle, github_username
               FROM user_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// The user owning the profile that records this GitHub login.
    pub async fn find_user_by_github(
        pool: &SqlitePool,
        github_username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT user_id FROM user_profiles WHERE github_username = ? ORDER BY id LIMIT 1",
        )
        .bind(github_username)
        .fetch_optional(pool)
        .await?;
        match user_id {
            Some(id) => User::find_by_id(pool, id).await,
            None => Ok(None),
        }
    }

    /// Apply the fields that are set; unset fields keep their value.
    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        data: &UpdateUserProfile,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserProfile>(
            r#"UPDATE user_profiles SET
                   contact_number  = COALESCE(?, contact_number),
                   bio             = COALESCE(?, bio),
                   homepage        = COALESCE(?, homepage),
                   twitter_handle  = COALESCE(?, twitter_handle),
                   github_username = COALESCE(?, github_username)
                WHERE user_id = ?
                RETURNING id, user_id, contact_number, bio, homepage, twitter_handle,
                          github_username"#,
        )
        .bind(&data.contact_number)
        .bind(&data.bio)
        .bind(&data.homepage)
        .bind(&data.twitter_handle)
        .bind(&data.github_username)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}
