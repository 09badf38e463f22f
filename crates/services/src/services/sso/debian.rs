use db::models::{user::User, user_profile::UpdateUserProfile};
use sqlx::SqlitePool;

use super::{SsoError, SsoIdentity, sso_login};
use crate::services::config::DebianSsoConfig;

pub const DEBIAN_EMAIL_DOMAIN: &str = "debian.org";

/// Login asserted by the Debian SSO reverse proxy through a request header.
#[derive(Debug, Clone)]
pub struct DebianSso {
    username_header: String,
}

impl DebianSso {
    pub fn new(username_header: impl Into<String>) -> Self {
        Self {
            username_header: username_header.into().to_ascii_lowercase(),
        }
    }

    pub fn from_config(config: &DebianSsoConfig) -> Self {
        Self::new(config.username_header.clone())
    }

    pub fn username_header(&self) -> &str {
        &self.username_header
    }

    /// `asserted` is the header value, if the proxy set one.
    pub async fn login(
        &self,
        pool: &SqlitePool,
        asserted: Option<&str>,
        registration_open: bool,
    ) -> Result<User, SsoError> {
        let username = asserted
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SsoError::Provider("Debian SSO authentication failed".to_string()))?;

        let email = format!("{username}@{DEBIAN_EMAIL_DOMAIN}");
        let existing = User::find_by_email(pool, &email).await?;
        let identity = SsoIdentity {
            desired_username: username.to_string(),
            name: String::new(),
            email,
            profile: UpdateUserProfile::default(),
        };
        sso_login(pool, existing, &identity, registration_open).await
    }
}
