use sqlx::SqlitePool;

use super::{
    talk::{CreateTalk, Talk, TalkStatus},
    user::{CreateUser, User},
};
use crate::DBService;

pub(crate) async fn setup_test_pool() -> SqlitePool {
    DBService::new_in_memory()
        .await
        .expect("failed to open sqlite memory db")
        .pool
}

pub(crate) async fn create_test_user(pool: &SqlitePool, username: &str) -> User {
    User::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: Some(format!("{username}_password")),
            first_name: String::new(),
            last_name: String::new(),
            is_superuser: false,
        },
    )
    .await
    .expect("failed to create test user")
}

pub(crate) async fn create_test_talk(
    pool: &SqlitePool,
    title: &str,
    status: TalkStatus,
    username: &str,
) -> Talk {
    let author = create_test_user(pool, username).await;
    let talk = Talk::create(
        pool,
        &CreateTalk {
            title: title.to_string(),
            talk_abstract: String::new(),
            notes: String::new(),
        },
        author.id,
    )
    .await
    .expect("failed to create test talk");
    Talk::set_status(pool, talk.talk_id, status)
        .await
        .expect("failed to set talk status")
}
