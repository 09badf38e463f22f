//! Who may see and who may change a talk submission.
//!
//! Everything here is a pure function of the talk status, the viewer and the
//! talk's author ids, so handlers load those once and ask.

use db::models::{
    talk::{Talk, TalkStatus},
    user::User,
};
use sqlx::SqlitePool;

pub const VIEW_ALL_TALKS: &str = "view_all_talks";

/// The requesting user, if any, with the permission codenames they hold.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user: Option<User>,
    pub permissions: Vec<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: User, permissions: Vec<String>) -> Self {
        Self {
            user: Some(user),
            permissions,
        }
    }

    /// Viewer for `user` with their direct and group permissions.
    pub async fn load(pool: &SqlitePool, user: User) -> Result<Self, sqlx::Error> {
        let permissions = User::permissions(pool, user.id).await?;
        Ok(Self::authenticated(user, permissions))
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|user| user.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_superuser(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| user.is_active && user.is_superuser)
    }

    /// Superusers hold every permission.
    pub fn has_perm(&self, codename: &str) -> bool {
        match &self.user {
            Some(user) if user.is_active => {
                user.is_superuser || self.permissions.iter().any(|p| p == codename)
            }
            _ => false,
        }
    }

    fn is_author(&self, author_ids: &[i64]) -> bool {
        self.user_id().is_some_and(|id| author_ids.contains(&id))
    }
}

pub fn can_view_all(viewer: &Viewer) -> bool {
    viewer.has_perm(VIEW_ALL_TALKS)
}

pub fn can_view(status: TalkStatus, viewer: &Viewer, author_ids: &[i64]) -> bool {
    status == TalkStatus::Accepted || viewer.is_author(author_ids) || can_view_all(viewer)
}

pub fn can_edit(status: TalkStatus, viewer: &Viewer, author_ids: &[i64]) -> bool {
    viewer.is_superuser() || (status == TalkStatus::Pending && viewer.is_author(author_ids))
}

/// The talk list for `viewer`: everything for reviewers, accepted talks otherwise.
pub async fn visible_talks(pool: &SqlitePool, viewer: &Viewer) -> Result<Vec<Talk>, sqlx::Error> {
    if can_view_all(viewer) {
        Talk::list_all(pool).await
    } else {
        Talk::list_by_status(pool, TalkStatus::Accepted).await
    }
}
