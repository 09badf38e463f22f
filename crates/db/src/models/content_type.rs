use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

use super::{
    kvpair::Key,
    ref_obj::{RefObjError, RefObject},
    schedule::{Day, Venue},
    talk::Talk,
    user::{Group, User},
};

/// Row identifying which table a generic reference points into.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ContentType {
    pub id: i64,
    pub app_label: String,
    pub model: String,
}

/// The models a content type may designate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ModelKind {
    User,
    Group,
    Talk,
    Venue,
    Day,
    Key,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::User,
        ModelKind::Group,
        ModelKind::Talk,
        ModelKind::Venue,
        ModelKind::Day,
        ModelKind::Key,
    ];

    pub fn natural_key(self) -> (&'static str, &'static str) {
        match self {
            ModelKind::User => ("auth", "user"),
            ModelKind::Group => ("auth", "group"),
            ModelKind::Talk => ("talks", "talk"),
            ModelKind::Venue => ("schedule", "venue"),
            ModelKind::Day => ("schedule", "day"),
            ModelKind::Key => ("kvpairs", "key"),
        }
    }

    pub fn from_natural_key(app_label: &str, model: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.natural_key() == (app_label, model))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model)
    }
}

impl ContentType {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ContentType>(
            "SELECT id, app_label, model FROM content_types WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_natural_key(
        pool: &SqlitePool,
        app_label: &str,
        model: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ContentType>(
            "SELECT id, app_label, model FROM content_types WHERE app_label = ? AND model = ?",
        )
        .bind(app_label)
        .bind(model)
        .fetch_optional(pool)
        .await
    }

    /// Content type row for a model, created on first use.
    pub async fn get_for_model(pool: &SqlitePool, kind: ModelKind) -> Result<Self, sqlx::Error> {
        let (app_label, model) = kind.natural_key();
        if let Some(existing) = Self::find_by_natural_key(pool, app_label, model).await? {
            return Ok(existing);
        }
        sqlx::query_as::<_, ContentType>(
            "INSERT INTO content_types (app_label, model) VALUES (?, ?)
             RETURNING id, app_label, model",
        )
        .bind(app_label)
        .bind(model)
        .fetch_one(pool)
        .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ContentType>(
            "SELECT id, app_label, model FROM content_types ORDER BY app_label, model",
        )
        .fetch_all(pool)
        .await
    }

    pub fn model_class(&self) -> Option<ModelKind> {
        ModelKind::from_natural_key(&self.app_label, &self.model)
    }

    /// Load the row with primary key `pk` from the table this content type designates.
    pub async fn get_object_for_this_type(
        &self,
        pool: &SqlitePool,
        pk: i64,
    ) -> Result<RefObject, RefObjError> {
        let kind = self
            .model_class()
            .ok_or_else(|| RefObjError::UnknownModel(self.to_string()))?;
        let not_found = || RefObjError::NotFound {
            content_type: self.to_string(),
            pk,
        };
        let object = match kind {
            ModelKind::User => User::find_by_id(pool, pk).await?.map(RefObject::User),
            ModelKind::Group => Group::find_by_id(pool, pk).await?.map(RefObject::Group),
            ModelKind::Talk => Talk::find_by_id(pool, pk).await?.map(RefObject::Talk),
            ModelKind::Venue => Venue::find_by_id(pool, pk).await?.map(RefObject::Venue),
            ModelKind::Day => Day::find_by_id(pool, pk).await?.map(RefObject::Day),
            ModelKind::Key => Key::find_by_id(pool, pk).await?.map(RefObject::Key),
        };
        object.ok_or_else(not_found)
    }
}
