use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;

use crate::services::AuthService;

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("User not found")]
    NotFound,
    #[error("Username already taken")]
    AlreadyExists,
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),
    #[error("Password hashing failed: {0}")]
    Password(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    /// `None` creates an account that can only log in through SSO.
    pub password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
     is_active, is_staff, is_superuser, date_joined, last_login";

fn map_unique(err: sqlx::Error) -> UserError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => UserError::AlreadyExists,
        _ => UserError::Database(err),
    }
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Accounts without a password hash never pass.
    pub fn verify_password(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(hash) => AuthService::verify_password(password, hash).unwrap_or(false),
            None => false,
        }
    }

    /// Insert the user together with its empty profile.
    pub async fn create(pool: &SqlitePool, data: &CreateUser) -> Result<Self, UserError> {
        let password_hash = match &data.password {
            Some(password) => Some(AuthService::hash_password(password)?),
            None => None,
        };

        let mut tx = pool.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash, first_name, last_name,
                                is_superuser, is_staff)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&data.username)
        .bind(&data.email)
        .bind(&password_hash)
        .bind(&data.first_name)
        .bind(&data.last_name)
        .bind(data.is_superuser)
        .bind(data.is_superuser)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;

        sqlx::query("INSERT INTO user_profiles (user_id) VALUES (?)")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    /// Oldest account registered with this e-mail address.
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? ORDER BY id LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn username_exists(pool: &SqlitePool, username: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn update_names(
        pool: &SqlitePool,
        id: i64,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET first_name = ?, last_name = ?, email = ? WHERE id = ?")
            .bind(first_name)
            .bind(last_name)
            .bind(email)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn touch_last_login(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login = datetime('now', 'subsec') WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Permission codenames granted directly or through groups.
    pub async fn permissions(pool: &SqlitePool, id: i64) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"SELECT p.codename FROM permissions p
                 JOIN user_permissions up ON up.permission_id = p.id
                WHERE up.user_id = ?1
               UNION
               SELECT p.codename FROM permissions p
                 JOIN group_permissions gp ON gp.permission_id = p.id
                 JOIN user_groups ug ON ug.group_id = gp.group_id
                WHERE ug.user_id = ?1
               ORDER BY 1"#,
        )
        .bind(id)
        .fetch_all(pool)
        .await
    }

    pub async fn grant_permission(
        pool: &SqlitePool,
        id: i64,
        codename: &str,
    ) -> Result<(), UserError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_permissions (user_id, permission_id)
             SELECT ?, id FROM permissions WHERE codename = ?",
        )
        .bind(id)
        .bind(codename)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 && !Self::has_permission_row(pool, codename).await? {
            return Err(UserError::UnknownPermission(codename.to_string()));
        }
        Ok(())
    }

    async fn has_permission_row(pool: &SqlitePool, codename: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions WHERE codename = ?")
            .bind(codename)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }
}

impl Group {
    pub async fn create(pool: &SqlitePool, name: &str) -> Result<Self, UserError> {
        sqlx::query_as::<_, Group>("INSERT INTO groups (name) VALUES (?) RETURNING id, name")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(map_unique)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>("SELECT id, name FROM groups WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn add_member(pool: &SqlitePool, group_id: i64, user_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(group_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn grant_permission(
        pool: &SqlitePool,
        group_id: i64,
        codename: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO group_permissions (group_id, permission_id)
             SELECT ?, id FROM permissions WHERE codename = ?",
        )
        .bind(group_id)
        .bind(codename)
        .execute(pool)
        .await?;
        Ok(())
    }
}
