//! Third-party sign-on: turn an external identity into a local account.

pub mod debian;
pub mod github;

use db::models::{
    user::{CreateUser, User, UserError},
    user_profile::{UpdateUserProfile, UserProfile},
};
use sqlx::SqlitePool;
use thiserror::Error;

pub use debian::DebianSso;
pub use github::GitHubSso;

/// Suffixes tried after the desired username: `name`, `name1` … `name9`.
const USERNAME_ATTEMPTS: usize = 10;

/// Every variant renders as a message fit to show the person logging in.
#[derive(Debug, Error)]
pub enum SsoError {
    #[error("Incorrect state")]
    InvalidState,
    #[error("Account disabled")]
    AccountDisabled,
    #[error("No account is linked to this login and registration is closed")]
    RegistrationClosed,
    #[error("Unable to claim a username for {0}")]
    UsernameUnavailable(String),
    #[error("{0}")]
    Provider(String),
    #[error("Could not reach the login provider")]
    Http(#[from] reqwest::Error),
    #[error("Login failed due to a server error")]
    Database(#[from] sqlx::Error),
    #[error("Login failed due to a server error")]
    User(#[from] UserError),
}

/// Identity asserted by a provider, used when a local account has to be created.
#[derive(Debug, Clone, Default)]
pub struct SsoIdentity {
    pub desired_username: String,
    pub name: String,
    pub email: String,
    pub profile: UpdateUserProfile,
}

/// Split a display name into first and last name at the first space.
pub fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

/// First free username among `desired`, `desired1` … `desired9`.
pub async fn claim_username(pool: &SqlitePool, desired: &str) -> Result<String, SsoError> {
    for attempt in 0..USERNAME_ATTEMPTS {
        let candidate = match attempt {
            0 => desired.to_string(),
            n => format!("{desired}{n}"),
        };
        if !User::username_exists(pool, &candidate).await? {
            return Ok(candidate);
        }
    }
    Err(SsoError::UsernameUnavailable(desired.to_string()))
}

/// Resolve the local account for an SSO login.
///
/// `existing` is the user the provider-specific lookup matched. Without one a
/// new account is registered, which requires open registration.
pub async fn sso_login(
    pool: &SqlitePool,
    existing: Option<User>,
    identity: &SsoIdentity,
    registration_open: bool,
) -> Result<User, SsoError> {
    let user = match existing {
        Some(user) => user,
        None => {
            if !registration_open {
                return Err(SsoError::RegistrationClosed);
            }
            register(pool, identity).await?
        }
    };

    if !user.is_active {
        return Err(SsoError::AccountDisabled);
    }
    User::touch_last_login(pool, user.id).await?;
    Ok(user)
}

async fn register(pool: &SqlitePool, identity: &SsoIdentity) -> Result<User, SsoError> {
    let username = claim_username(pool, &identity.desired_username).await?;
    let (first_name, last_name) = split_name(&identity.name);
    let user = User::create(
        pool,
        &CreateUser {
            username,
            email: identity.email.clone(),
            password: None,
            first_name,
            last_name,
            is_superuser: false,
        },
    )
    .await?;
    UserProfile::update(pool, user.id, &identity.profile).await?;

    tracing::info!("Registered {} through SSO", user.username);
    Ok(user)
}

#[cfg(test)]
pub(crate) mod tests {
    use db::DBService;

    use super::*;

    pub(crate) async fn pool() -> SqlitePool {
        DBService::new_in_memory().await.unwrap().pool
    }

    pub(crate) async fn user(pool: &SqlitePool, username: &str, email: &str) -> User {
        User::create(
            pool,
            &CreateUser {
                username: username.to_string(),
                email: email.to_string(),
                password: None,
                first_name: String::new(),
                last_name: String::new(),
                is_superuser: false,
            },
        )
        .await
        .unwrap()
    }

    fn identity(username: &str) -> SsoIdentity {
        SsoIdentity {
            desired_username: username.to_string(),
            name: "Ada King Lovelace".to_string(),
            email: format!("{username}@example.org"),
            profile: UpdateUserProfile {
                github_username: Some(username.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn names_split_at_the_first_space() {
        assert_eq!(
            split_name("Ada King Lovelace"),
            ("Ada".to_string(), "King Lovelace".to_string())
        );
        assert_eq!(split_name("ada"), ("ada".to_string(), String::new()));
        assert_eq!(split_name(""), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn usernames_get_a_counter_when_taken() {
        let pool = pool().await;
        assert_eq!(claim_username(&pool, "ada").await.unwrap(), "ada");

        user(&pool, "ada", "a@example.org").await;
        user(&pool, "ada1", "b@example.org").await;
        assert_eq!(claim_username(&pool, "ada").await.unwrap(), "ada2");

        for n in 2..10 {
            user(&pool, &format!("ada{n}"), &format!("{n}@example.org")).await;
        }
        assert!(matches!(
            claim_username(&pool, "ada").await,
            Err(SsoError::UsernameUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn new_identities_need_open_registration() {
        let pool = pool().await;
        let closed = sso_login(&pool, None, &identity("grace"), false).await;
        assert!(matches!(closed, Err(SsoError::RegistrationClosed)));
        assert!(!User::username_exists(&pool, "grace").await.unwrap());

        let created = sso_login(&pool, None, &identity("grace"), true)
            .await
            .unwrap();
        assert_eq!(created.first_name, "Ada");
        assert_eq!(created.last_name, "King Lovelace");
        assert!(created.password_hash.is_none());
        let linked = UserProfile::find_user_by_github(&pool, "grace")
            .await
            .unwrap();
        assert_eq!(linked.map(|u| u.id), Some(created.id));
    }

    #[tokio::test]
    async fn disabled_accounts_are_refused() {
        let pool = pool().await;
        let existing = user(&pool, "mallory", "m@example.org").await;
        User::set_active(&pool, existing.id, false).await.unwrap();
        let existing = User::find_by_id(&pool, existing.id).await.unwrap();

        let err = sso_login(&pool, existing, &identity("mallory"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::AccountDisabled));
        assert_eq!(err.to_string(), "Account disabled");
    }
}
