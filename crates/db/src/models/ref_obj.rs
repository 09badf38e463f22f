//! Generic reference field.
//!
//! A [`RefObjField`] stores a bare integer that is a primary key into a table
//! chosen per row. The table is found by walking a [`CtPath`] (for example
//! `key.model_ct`) from the owning row to a [`ContentType`]; the pointer is
//! re-resolved every time the owning row is materialised and never persisted.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use ts_rs::TS;

use super::{
    content_type::{ContentType, ModelKind},
    kvpair::Key,
    schedule::{Day, Venue},
    talk::Talk,
    user::{Group, User},
};

#[derive(Debug, Error)]
pub enum RefObjError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{content_type} matching pk {pk} does not exist")]
    NotFound { content_type: String, pk: i64 },
    #[error("Content type {0} does not designate a known model")]
    UnknownModel(String),
    #[error("Content type {0} does not exist")]
    MissingContentType(i64),
    #[error("{owner} has no attribute {attr}")]
    UnknownAttribute { owner: &'static str, attr: String },
    #[error("Content type path is empty")]
    EmptyPath,
    #[error("RefObjField got invalid lookup: {0}")]
    InvalidLookup(String),
    #[error("Invalid value for {lookup} lookup: {value}")]
    InvalidValue { lookup: &'static str, value: String },
    #[error("Expected a {expected:?} reference, got {actual:?}")]
    WrongModel {
        expected: ModelKind,
        actual: ModelKind,
    },
    #[error("Reference read before its content type was resolved")]
    Unbound,
}

/// Dotted attribute path ending in a content-type attribute.
///
/// `"key.model_ct"` follows the `key` relation, then reads `model_ct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtPath {
    relations: Vec<String>,
    ct_field: String,
}

impl CtPath {
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn ct_field(&self) -> &str {
        &self.ct_field
    }

    /// Walk the path starting at `root` and load the content type it ends on.
    pub async fn resolve(
        &self,
        root: &dyn Walk,
        pool: &SqlitePool,
    ) -> Result<ContentType, RefObjError> {
        let mut current: Option<Box<dyn Walk>> = None;
        for name in &self.relations {
            let next = match &current {
                Some(node) => node.relation(pool, name).await?,
                None => root.relation(pool, name).await?,
            };
            current = Some(next);
        }
        let node: &dyn Walk = current.as_deref().unwrap_or(root);
        let ct_id = node.content_type_id(&self.ct_field)?;
        ContentType::find_by_id(pool, ct_id)
            .await?
            .ok_or(RefObjError::MissingContentType(ct_id))
    }
}

impl FromStr for CtPath {
    type Err = RefObjError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut relations: Vec<String> = s
            .split('.')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        let ct_field = relations.pop().ok_or(RefObjError::EmptyPath)?;
        Ok(CtPath {
            relations,
            ct_field,
        })
    }
}

impl fmt::Display for CtPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for relation in &self.relations {
            write!(f, "{relation}.")?;
        }
        f.write_str(&self.ct_field)
    }
}

/// A row that can be stepped through while resolving a [`CtPath`].
#[async_trait]
pub trait Walk: Send + Sync {
    fn model_name(&self) -> &'static str;

    /// Follow the relation `name` to the related row.
    async fn relation(&self, _pool: &SqlitePool, name: &str) -> Result<Box<dyn Walk>, RefObjError> {
        Err(RefObjError::UnknownAttribute {
            owner: self.model_name(),
            attr: name.to_string(),
        })
    }

    /// Read the content-type id stored in attribute `name`.
    fn content_type_id(&self, name: &str) -> Result<i64, RefObjError> {
        Err(RefObjError::UnknownAttribute {
            owner: self.model_name(),
            attr: name.to_string(),
        })
    }
}

/// A loaded row of any model a content type can designate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "model", content = "object", rename_all = "snake_case")]
#[ts(export)]
pub enum RefObject {
    User(User),
    Group(Group),
    Talk(Talk),
    Venue(Venue),
    Day(Day),
    Key(Key),
}

impl RefObject {
    pub fn pk(&self) -> i64 {
        match self {
            RefObject::User(user) => user.id,
            RefObject::Group(group) => group.id,
            RefObject::Talk(talk) => talk.talk_id,
            RefObject::Venue(venue) => venue.id,
            RefObject::Day(day) => day.id,
            RefObject::Key(key) => key.id,
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            RefObject::User(_) => ModelKind::User,
            RefObject::Group(_) => ModelKind::Group,
            RefObject::Talk(_) => ModelKind::Talk,
            RefObject::Venue(_) => ModelKind::Venue,
            RefObject::Day(_) => ModelKind::Day,
            RefObject::Key(_) => ModelKind::Key,
        }
    }
}

/// Integer column holding a primary key into the table named by a resolved content type.
#[derive(Debug, Clone)]
pub struct RefObjField {
    path: CtPath,
    raw: i64,
    ct_pointer: Option<ContentType>,
    related_model: Option<ModelKind>,
    cache: Option<RefObject>,
}

impl RefObjField {
    pub fn new(path: CtPath, raw: i64) -> Self {
        RefObjField {
            path,
            raw,
            ct_pointer: None,
            related_model: None,
            cache: None,
        }
    }

    pub fn path(&self) -> &CtPath {
        &self.path
    }

    /// The stored primary key, as persisted in the `<name>_id` column.
    pub fn raw(&self) -> i64 {
        self.raw
    }

    pub fn ct_pointer(&self) -> Option<&ContentType> {
        self.ct_pointer.as_ref()
    }

    pub fn related_model(&self) -> Option<ModelKind> {
        self.related_model
    }

    /// The decoded object if it has already been read or written.
    pub fn cached(&self) -> Option<&RefObject> {
        self.cache.as_ref()
    }

    /// Attach the content type found by walking the path from the owning row.
    ///
    /// A cached object decoded under a different content type is dropped.
    pub fn bind_ct_pointer(&mut self, ct_pointer: ContentType) {
        if self.ct_pointer.as_ref() != Some(&ct_pointer) {
            self.cache = None;
        }
        self.related_model = ct_pointer.model_class();
        self.ct_pointer = Some(ct_pointer);
    }

    pub fn pack(obj: &RefObject) -> i64 {
        obj.pk()
    }

    pub async fn unpack(&self, pool: &SqlitePool, raw: i64) -> Result<RefObject, RefObjError> {
        let ct = self.ct_pointer.as_ref().ok_or(RefObjError::Unbound)?;
        ct.get_object_for_this_type(pool, raw).await
    }

    /// Decode the stored key on first access and keep the result.
    pub async fn get(&mut self, pool: &SqlitePool) -> Result<&RefObject, RefObjError> {
        if self.cache.is_none() {
            let obj = self.unpack(pool, self.raw).await?;
            self.cache = Some(obj);
        }
        self.cache.as_ref().ok_or(RefObjError::Unbound)
    }

    /// Store the object for this session and its primary key for persistence.
    pub fn set(&mut self, obj: RefObject) -> Result<(), RefObjError> {
        match self.related_model {
            Some(expected) if expected != obj.kind() => {
                return Err(RefObjError::WrongModel {
                    expected,
                    actual: obj.kind(),
                });
            }
            _ => {}
        }
        self.raw = Self::pack(&obj);
        self.cache = Some(obj);
        Ok(())
    }
}

impl fmt::Display for RefObjField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<kvpairs.RefObjField: {}", self.path)?;
        if let Some(ct) = &self.ct_pointer {
            write!(f, "[{ct}]")?;
        }
        f.write_str(">")
    }
}

/// Filter against a reference column. Only `exact` and `isnull` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefLookup {
    Exact(i64),
    IsNull(bool),
}

impl RefLookup {
    pub fn exact_object(obj: &RefObject) -> Self {
        RefLookup::Exact(obj.pk())
    }

    /// Build a lookup from its kind and a raw query-string value.
    pub fn parse(lookup: &str, raw: &str) -> Result<Self, RefObjError> {
        match lookup {
            "exact" => raw
                .trim()
                .parse::<i64>()
                .map(RefLookup::Exact)
                .map_err(|_| RefObjError::InvalidValue {
                    lookup: "exact",
                    value: raw.to_string(),
                }),
            "isnull" => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(RefLookup::IsNull(true)),
                "false" | "0" => Ok(RefLookup::IsNull(false)),
                _ => Err(RefObjError::InvalidValue {
                    lookup: "isnull",
                    value: raw.to_string(),
                }),
            },
            other => Err(RefObjError::InvalidLookup(other.to_string())),
        }
    }

    /// Interpret a `field` / `field__lookup` parameter. Parameters naming other fields yield `None`.
    pub fn from_param(field: &str, param: &str, raw: &str) -> Result<Option<Self>, RefObjError> {
        if param == field {
            return Self::parse("exact", raw).map(Some);
        }
        match param
            .strip_prefix(field)
            .and_then(|rest| rest.strip_prefix("__"))
        {
            Some(lookup) => Self::parse(lookup, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Append the constraint on `column` to a query under construction.
    pub fn push_sql<'args>(&self, qb: &mut QueryBuilder<'args, Sqlite>, column: &str) {
        match *self {
            RefLookup::Exact(pk) => {
                qb.push(column).push(" = ").push_bind(pk);
            }
            RefLookup::IsNull(true) => {
                qb.push(column).push(" IS NULL");
            }
            RefLookup::IsNull(false) => {
                qb.push(column).push(" IS NOT NULL");
            }
        }
    }
}
