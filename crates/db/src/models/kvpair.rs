use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use ts_rs::TS;

use super::{
    content_type::{ContentType, ModelKind},
    ref_obj::{CtPath, RefLookup, RefObjError, RefObjField, RefObject, Walk},
};

/// Path from a pair to the content type that gives its `ref_obj` meaning.
pub const REF_OBJ_CT_PATH: &str = "key.model_ct";

pub const MAX_KEY_NAME_LEN: usize = 255;
pub const MAX_VALUE_LEN: usize = 65535;

#[derive(Debug, Error)]
pub enum KvError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    RefObj(#[from] RefObjError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("{0} is still referenced and cannot be deleted")]
    Protected(&'static str),
    #[error("{0}")]
    Validation(String),
}

fn map_write(model: &'static str) -> impl Fn(sqlx::Error) -> KvError {
    move |err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            KvError::AlreadyExists(model)
        }
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            KvError::Protected(model)
        }
        _ => KvError::Database(err),
    }
}

/// Named attribute declared for one model type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Key {
    pub id: i64,
    pub name: String,
    pub model_ct_id: i64,
    pub group_id: Option<i64>,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateKey {
    pub name: String,
    pub model: ModelKind,
    pub group_id: Option<i64>,
}

const KEY_COLUMNS: &str = "id, name, model_ct_id, group_id, owner_id";

impl Key {
    pub async fn create(pool: &SqlitePool, data: &CreateKey, owner_id: i64) -> Result<Self, KvError> {
        let name = data.name.trim();
        if name.is_empty() || name.chars().count() > MAX_KEY_NAME_LEN {
            return Err(KvError::Validation(format!(
                "Key name must be between 1 and {MAX_KEY_NAME_LEN} characters"
            )));
        }
        let ct = ContentType::get_for_model(pool, data.model).await?;
        let key = sqlx::query_as::<_, Key>(&format!(
            "INSERT INTO kv_keys (name, model_ct_id, group_id, owner_id)
             VALUES (?, ?, ?, ?)
             RETURNING {KEY_COLUMNS}"
        ))
        .bind(name)
        .bind(ct.id)
        .bind(data.group_id)
        .bind(owner_id)
        .fetch_one(pool)
        .await
        .map_err(map_write("Key"))?;

        tracing::debug!("Created key {} for {}", key.name, ct);
        Ok(key)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Key>(&format!("SELECT {KEY_COLUMNS} FROM kv_keys WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Key>(&format!(
            "SELECT {KEY_COLUMNS} FROM kv_keys ORDER BY model_ct_id, name"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_model(pool: &SqlitePool, kind: ModelKind) -> Result<Vec<Self>, sqlx::Error> {
        let ct = ContentType::get_for_model(pool, kind).await?;
        sqlx::query_as::<_, Key>(&format!(
            "SELECT {KEY_COLUMNS} FROM kv_keys WHERE model_ct_id = ? ORDER BY name"
        ))
        .bind(ct.id)
        .fetch_all(pool)
        .await
    }

    pub async fn model_ct(&self, pool: &SqlitePool) -> Result<ContentType, KvError> {
        ContentType::find_by_id(pool, self.model_ct_id)
            .await?
            .ok_or(KvError::RefObj(RefObjError::MissingContentType(
                self.model_ct_id,
            )))
    }

    /// Fails with `Protected` while any pair still uses the key.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), KvError> {
        let result = sqlx::query("DELETE FROM kv_keys WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_write("Key"))?;
        if result.rows_affected() == 0 {
            return Err(KvError::NotFound("Key"));
        }
        Ok(())
    }
}

#[async_trait]
impl Walk for Key {
    fn model_name(&self) -> &'static str {
        "Key"
    }

    fn content_type_id(&self, name: &str) -> Result<i64, RefObjError> {
        match name {
            "model_ct" => Ok(self.model_ct_id),
            other => Err(RefObjError::UnknownAttribute {
                owner: self.model_name(),
                attr: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, FromRow)]
struct KeyValuePairRow {
    id: i64,
    key_id: i64,
    ref_obj_id: i64,
    value: String,
}

/// Value attached to one object under a key. `ref_obj` points into the key's model table.
#[derive(Debug, Clone)]
pub struct KeyValuePair {
    pub id: i64,
    pub key_id: i64,
    pub ref_obj: RefObjField,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateKeyValuePair {
    pub key_id: i64,
    pub ref_obj_id: i64,
    pub value: String,
}

/// Serialized form of a pair, with the resolved content type of its reference.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct KeyValuePairView {
    pub id: i64,
    pub key_id: i64,
    pub ref_obj_id: i64,
    pub ref_obj_type: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct KvFilter {
    pub key_id: Option<i64>,
    pub ref_obj: Vec<RefLookup>,
}

fn validate_value(value: &str) -> Result<(), KvError> {
    if value.chars().count() > MAX_VALUE_LEN {
        return Err(KvError::Validation(format!(
            "Value must be at most {MAX_VALUE_LEN} characters"
        )));
    }
    Ok(())
}

const PAIR_COLUMNS: &str = "id, key_id, ref_obj_id, value";

impl KeyValuePair {
    /// Materialise a row and resolve its content-type pointer.
    async fn hydrate(pool: &SqlitePool, row: KeyValuePairRow) -> Result<Self, KvError> {
        let path: CtPath = REF_OBJ_CT_PATH.parse()?;
        let mut pair = KeyValuePair {
            id: row.id,
            key_id: row.key_id,
            ref_obj: RefObjField::new(path, row.ref_obj_id),
            value: row.value,
        };
        pair.update_ct_pointer(pool).await?;
        Ok(pair)
    }

    /// Re-walk the content-type path from this row. Run after every load and key change.
    pub async fn update_ct_pointer(&mut self, pool: &SqlitePool) -> Result<(), KvError> {
        let path = self.ref_obj.path().clone();
        let ct = path.resolve(&*self, pool).await?;
        self.ref_obj.bind_ct_pointer(ct);
        Ok(())
    }

    pub async fn create(pool: &SqlitePool, data: &CreateKeyValuePair) -> Result<Self, KvError> {
        validate_value(&data.value)?;
        if data.ref_obj_id < 0 {
            return Err(KvError::Validation(
                "ref_obj_id must be a non-negative integer".to_string(),
            ));
        }
        let key = Key::find_by_id(pool, data.key_id)
            .await?
            .ok_or(KvError::NotFound("Key"))?;
        let target = key
            .model_ct(pool)
            .await?
            .get_object_for_this_type(pool, data.ref_obj_id)
            .await?;

        let row = sqlx::query_as::<_, KeyValuePairRow>(&format!(
            "INSERT INTO kv_pairs (key_id, ref_obj_id, value) VALUES (?, ?, ?)
             RETURNING {PAIR_COLUMNS}"
        ))
        .bind(data.key_id)
        .bind(data.ref_obj_id)
        .bind(&data.value)
        .fetch_one(pool)
        .await
        .map_err(map_write("KeyValuePair"))?;

        let mut pair = Self::hydrate(pool, row).await?;
        pair.ref_obj.set(target)?;
        Ok(pair)
    }

    /// Attach `value` to `obj` under `key`. The object must be of the key's model.
    pub async fn create_for_object(
        pool: &SqlitePool,
        key: &Key,
        obj: RefObject,
        value: &str,
    ) -> Result<Self, KvError> {
        let expected = key.model_ct(pool).await?.model_class();
        if expected != Some(obj.kind()) {
            return Err(KvError::Validation(format!(
                "Key {} does not apply to {:?} objects",
                key.name,
                obj.kind()
            )));
        }
        let mut pair = Self::create(
            pool,
            &CreateKeyValuePair {
                key_id: key.id,
                ref_obj_id: RefObjField::pack(&obj),
                value: value.to_string(),
            },
        )
        .await?;
        pair.ref_obj.set(obj)?;
        Ok(pair)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, KvError> {
        let row = sqlx::query_as::<_, KeyValuePairRow>(&format!(
            "SELECT {PAIR_COLUMNS} FROM kv_pairs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        match row {
            Some(row) => Ok(Some(Self::hydrate(pool, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn filter(pool: &SqlitePool, filter: &KvFilter) -> Result<Vec<Self>, KvError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {PAIR_COLUMNS} FROM kv_pairs WHERE 1 = 1"));
        if let Some(key_id) = filter.key_id {
            qb.push(" AND key_id = ").push_bind(key_id);
        }
        for lookup in &filter.ref_obj {
            qb.push(" AND ");
            lookup.push_sql(&mut qb, "ref_obj_id");
        }
        qb.push(" ORDER BY id");

        let rows = qb
            .build_query_as::<KeyValuePairRow>()
            .fetch_all(pool)
            .await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            pairs.push(Self::hydrate(pool, row).await?);
        }
        Ok(pairs)
    }

    /// Decode the referenced object, loading it on first access.
    pub async fn ref_object(&mut self, pool: &SqlitePool) -> Result<&RefObject, KvError> {
        Ok(self.ref_obj.get(pool).await?)
    }

    /// Persist the current key, reference and value.
    pub async fn save(&mut self, pool: &SqlitePool) -> Result<(), KvError> {
        validate_value(&self.value)?;
        let result = sqlx::query(
            "UPDATE kv_pairs SET key_id = ?, ref_obj_id = ?, value = ? WHERE id = ?",
        )
        .bind(self.key_id)
        .bind(self.ref_obj.raw())
        .bind(&self.value)
        .bind(self.id)
        .execute(pool)
        .await
        .map_err(map_write("KeyValuePair"))?;
        if result.rows_affected() == 0 {
            return Err(KvError::NotFound("KeyValuePair"));
        }
        self.update_ct_pointer(pool).await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), KvError> {
        let result = sqlx::query("DELETE FROM kv_pairs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KvError::NotFound("KeyValuePair"));
        }
        Ok(())
    }

    pub fn view(&self) -> KeyValuePairView {
        KeyValuePairView {
            id: self.id,
            key_id: self.key_id,
            ref_obj_id: self.ref_obj.raw(),
            ref_obj_type: self.ref_obj.ct_pointer().map(ToString::to_string),
            value: self.value.clone(),
        }
    }
}

#[async_trait]
impl Walk for KeyValuePair {
    fn model_name(&self) -> &'static str {
        "KeyValuePair"
    }

    async fn relation(&self, pool: &SqlitePool, name: &str) -> Result<Box<dyn Walk>, RefObjError> {
        match name {
            "key" => {
                let key = Key::find_by_id(pool, self.key_id)
                    .await?
                    .ok_or_else(|| RefObjError::NotFound {
                        content_type: "kvpairs.key".to_string(),
                        pk: self.key_id,
                    })?;
                Ok(Box::new(key))
            }
            other => Err(RefObjError::UnknownAttribute {
                owner: self.model_name(),
                attr: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        talk::{Talk, TalkStatus},
        test_utils::{create_test_talk, create_test_user, setup_test_pool},
        user::Group,
    };

    async fn talk_key(pool: &SqlitePool, name: &str) -> Key {
        let owner = create_test_user(pool, &format!("{name}_owner")).await;
        Key::create(
            pool,
            &CreateKey {
                name: name.to_string(),
                model: ModelKind::Talk,
                group_id: None,
            },
            owner.id,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reference_round_trips_through_the_key_content_type() {
        let pool = setup_test_pool().await;
        let key = talk_key(&pool, "room").await;
        let talk = create_test_talk(&pool, "Packaging", TalkStatus::Accepted, "alice").await;

        let created =
            KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk.clone()), "A")
                .await
                .unwrap();
        assert_eq!(created.ref_obj.raw(), talk.talk_id);

        let mut loaded = KeyValuePair::find_by_id(&pool, created.id)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.ref_obj.cached().is_none());
        assert_eq!(loaded.ref_obj.related_model(), Some(ModelKind::Talk));
        assert_eq!(
            loaded.ref_obj.to_string(),
            "<kvpairs.RefObjField: key.model_ct[talks.talk]>"
        );
        assert_eq!(
            loaded.ref_object(&pool).await.unwrap(),
            &RefObject::Talk(talk)
        );
        assert!(loaded.ref_obj.cached().is_some());
        assert_eq!(loaded.view().ref_obj_type.as_deref(), Some("talks.talk"));
    }

    #[tokio::test]
    async fn pointer_follows_the_key_when_it_changes() {
        let pool = setup_test_pool().await;
        let talk_key = talk_key(&pool, "track").await;
        let owner = create_test_user(&pool, "day_owner").await;
        let user_key = Key::create(
            &pool,
            &CreateKey {
                name: "shirt".to_string(),
                model: ModelKind::User,
                group_id: None,
            },
            owner.id,
        )
        .await
        .unwrap();
        let talk = create_test_talk(&pool, "Kernels", TalkStatus::Pending, "bob").await;

        let mut pair = KeyValuePair::create(
            &pool,
            &CreateKeyValuePair {
                key_id: talk_key.id,
                ref_obj_id: talk.talk_id,
                value: "x".to_string(),
            },
        )
        .await
        .unwrap();

        pair.key_id = user_key.id;
        pair.ref_obj.set(RefObject::User(owner.clone())).unwrap_err();
        pair.save(&pool).await.unwrap();
        assert_eq!(pair.ref_obj.related_model(), Some(ModelKind::User));
        pair.ref_obj.set(RefObject::User(owner.clone())).unwrap();
        pair.save(&pool).await.unwrap();

        let mut reloaded = KeyValuePair::find_by_id(&pool, pair.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.ref_object(&pool).await.unwrap(),
            &RefObject::User(owner)
        );
    }

    #[tokio::test]
    async fn key_change_drops_object_decoded_under_old_type() {
        let pool = setup_test_pool().await;
        let talk_key = talk_key(&pool, "slides").await;
        let speaker = create_test_user(&pool, "speaker").await;
        let user_key = Key::create(
            &pool,
            &CreateKey {
                name: "badge".to_string(),
                model: ModelKind::User,
                group_id: None,
            },
            speaker.id,
        )
        .await
        .unwrap();
        let talk = create_test_talk(&pool, "Reproducible builds", TalkStatus::Accepted, "eve").await;

        let mut pair =
            KeyValuePair::create_for_object(&pool, &talk_key, RefObject::Talk(talk), "pdf")
                .await
                .unwrap();
        assert_eq!(pair.ref_obj.cached().map(RefObject::kind), Some(ModelKind::Talk));

        pair.key_id = user_key.id;
        pair.save(&pool).await.unwrap();
        assert_eq!(pair.ref_obj.related_model(), Some(ModelKind::User));
        assert!(pair.ref_obj.cached().is_none());

        // Rebinding the same content type keeps the cache.
        pair.ref_obj.set(RefObject::User(speaker.clone())).unwrap();
        pair.save(&pool).await.unwrap();
        assert_eq!(pair.ref_obj.cached(), Some(&RefObject::User(speaker)));
    }

    #[tokio::test]
    async fn filtering_supports_exact_and_isnull() {
        let pool = setup_test_pool().await;
        let key = talk_key(&pool, "level").await;
        let first = create_test_talk(&pool, "One", TalkStatus::Accepted, "alice").await;
        let second = create_test_talk(&pool, "Two", TalkStatus::Accepted, "bob").await;
        KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(first.clone()), "beginner")
            .await
            .unwrap();
        KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(second), "expert")
            .await
            .unwrap();

        let exact = KeyValuePair::filter(
            &pool,
            &KvFilter {
                key_id: Some(key.id),
                ref_obj: vec![RefLookup::exact_object(&RefObject::Talk(first))],
            },
        )
        .await
        .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].value, "beginner");

        let null = KeyValuePair::filter(
            &pool,
            &KvFilter {
                key_id: None,
                ref_obj: vec![RefLookup::IsNull(true)],
            },
        )
        .await
        .unwrap();
        assert!(null.is_empty());

        let not_null = KeyValuePair::filter(
            &pool,
            &KvFilter {
                key_id: None,
                ref_obj: vec![RefLookup::IsNull(false)],
            },
        )
        .await
        .unwrap();
        assert_eq!(not_null.len(), 2);
    }

    #[tokio::test]
    async fn dangling_reference_reports_not_found_on_read() {
        let pool = setup_test_pool().await;
        let key = talk_key(&pool, "slides").await;
        let talk = create_test_talk(&pool, "Gone", TalkStatus::Rejected, "carol").await;
        let pair = KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk.clone()), "url")
            .await
            .unwrap();

        Talk::delete(&pool, talk.talk_id).await.unwrap();

        let mut loaded = KeyValuePair::find_by_id(&pool, pair.id).await.unwrap().unwrap();
        assert!(matches!(
            loaded.ref_object(&pool).await,
            Err(KvError::RefObj(RefObjError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn create_rejects_missing_targets_and_mismatched_models() {
        let pool = setup_test_pool().await;
        let key = talk_key(&pool, "video").await;
        let user = create_test_user(&pool, "dave").await;

        let missing = KeyValuePair::create(
            &pool,
            &CreateKeyValuePair {
                key_id: key.id,
                ref_obj_id: 4242,
                value: String::new(),
            },
        )
        .await;
        assert!(matches!(
            missing,
            Err(KvError::RefObj(RefObjError::NotFound { pk: 4242, .. }))
        ));

        let mismatched =
            KeyValuePair::create_for_object(&pool, &key, RefObject::User(user), "x").await;
        assert!(matches!(mismatched, Err(KvError::Validation(_))));

        let too_long = "v".repeat(MAX_VALUE_LEN + 1);
        let talk = create_test_talk(&pool, "Long", TalkStatus::Pending, "erin").await;
        let oversized =
            KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk), &too_long).await;
        assert!(matches!(oversized, Err(KvError::Validation(_))));
    }

    #[tokio::test]
    async fn uniqueness_is_enforced_per_key_and_object() {
        let pool = setup_test_pool().await;
        let key = talk_key(&pool, "room").await;
        let talk = create_test_talk(&pool, "Dup", TalkStatus::Accepted, "frank").await;
        KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk.clone()), "A")
            .await
            .unwrap();
        let again =
            KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk), "B").await;
        assert!(matches!(again, Err(KvError::AlreadyExists("KeyValuePair"))));

        let owner = create_test_user(&pool, "grace").await;
        let same_name = Key::create(
            &pool,
            &CreateKey {
                name: "room".to_string(),
                model: ModelKind::Talk,
                group_id: None,
            },
            owner.id,
        )
        .await;
        assert!(matches!(same_name, Err(KvError::AlreadyExists("Key"))));

        Key::create(
            &pool,
            &CreateKey {
                name: "room".to_string(),
                model: ModelKind::Venue,
                group_id: None,
            },
            owner.id,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn keys_are_protected_and_groups_are_released() {
        let pool = setup_test_pool().await;
        let owner = create_test_user(&pool, "heidi").await;
        let group = Group::create(&pool, "reviewers").await.unwrap();
        let key = Key::create(
            &pool,
            &CreateKey {
                name: "score".to_string(),
                model: ModelKind::Talk,
                group_id: Some(group.id),
            },
            owner.id,
        )
        .await
        .unwrap();
        let talk = create_test_talk(&pool, "Scored", TalkStatus::Pending, "ivan").await;
        let pair = KeyValuePair::create_for_object(&pool, &key, RefObject::Talk(talk), "5")
            .await
            .unwrap();

        assert!(matches!(
            Key::delete(&pool, key.id).await,
            Err(KvError::Protected("Key"))
        ));
        let owner_delete = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(owner.id)
            .execute(&pool)
            .await;
        assert!(owner_delete.is_err());

        Group::delete(&pool, group.id).await.unwrap();
        let key = Key::find_by_id(&pool, key.id).await.unwrap().unwrap();
        assert_eq!(key.group_id, None);

        KeyValuePair::delete(&pool, pair.id).await.unwrap();
        Key::delete(&pool, key.id).await.unwrap();
        assert!(Key::find_by_id(&pool, key.id).await.unwrap().is_none());
    }
}
