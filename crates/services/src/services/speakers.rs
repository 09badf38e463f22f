use db::models::{
    talk::Talk,
    user_profile::{UserProfile, avatar_url},
};
use serde::Serialize;
use sqlx::SqlitePool;
use ts_rs::TS;

pub const SPEAKERS_PER_ROW: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct Speaker {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub profile_url: String,
}

/// Split `items` into consecutive rows holding at most `per_row` entries.
pub fn speaker_rows<T: Clone>(items: &[T], per_row: usize) -> Vec<Vec<T>> {
    items
        .chunks(per_row.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

/// Authors of accepted talks, ordered by user id.
pub async fn accepted_speakers(pool: &SqlitePool) -> Result<Vec<Speaker>, sqlx::Error> {
    let users = Talk::accepted_speakers(pool).await?;
    Ok(users
        .into_iter()
        .map(|user| {
            let display_name = match user.full_name() {
                name if name.is_empty() => user.username.clone(),
                name => name,
            };
            Speaker {
                user_id: user.id,
                avatar_url: avatar_url(&user.email),
                profile_url: UserProfile::profile_path(&user.username),
                username: user.username,
                display_name,
            }
        })
        .collect())
}
