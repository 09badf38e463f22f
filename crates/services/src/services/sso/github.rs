use db::models::{
    user::User,
    user_profile::{UpdateUserProfile, UserProfile},
};
use serde::Deserialize;
use sqlx::SqlitePool;

use super::{SsoError, SsoIdentity, sso_login};
use crate::services::config::GitHubSsoConfig;

pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_SCOPE: &str = "user:email";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Prefer the primary verified address, then any verified one.
pub fn select_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

/// HTTP client for GitHub calls. Build once and share; clones reuse the
/// connection pool.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("wafer/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// OAuth web-flow client for GitHub logins.
#[derive(Clone)]
pub struct GitHubSso {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    api_base: String,
}

impl GitHubSso {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    /// `None` until both client id and secret are configured.
    pub fn from_config(config: &GitHubSsoConfig, http: &reqwest::Client) -> Option<Self> {
        match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => Some(Self::new(http.clone(), id.clone(), secret.clone())),
            _ => None,
        }
    }

    /// Point the token exchange and API calls somewhere other than github.com.
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_base = api_base.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{GITHUB_AUTHORIZE_URL}?client_id={}&redirect_uri={}&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GITHUB_SCOPE),
            urlencoding::encode(state),
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<String, SsoError> {
        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;

        match token.access_token {
            Some(access_token) => Ok(access_token),
            None => {
                tracing::warn!(
                    "GitHub token exchange failed: {} {}",
                    token.error.as_deref().unwrap_or("unknown error"),
                    token.error_description.as_deref().unwrap_or_default()
                );
                Err(SsoError::Provider("Invalid code".to_string()))
            }
        }
    }

    pub async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, SsoError> {
        Ok(self
            .http
            .get(format!("{}/user", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn fetch_emails(&self, access_token: &str) -> Result<Vec<GitHubEmail>, SsoError> {
        Ok(self
            .http
            .get(format!("{}/user/emails", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Complete the callback leg: code -> token -> GitHub account -> local user.
    pub async fn login(
        &self,
        pool: &SqlitePool,
        code: &str,
        registration_open: bool,
    ) -> Result<User, SsoError> {
        let access_token = self.exchange_code(code).await?;
        let gh = self.fetch_user(&access_token).await?;
        let existing = UserProfile::find_user_by_github(pool, &gh.login).await?;

        let email = match &existing {
            Some(user) => user.email.clone(),
            None => {
                let emails = self.fetch_emails(&access_token).await?;
                select_email(&emails)
                    .or_else(|| gh.email.clone())
                    .ok_or_else(|| {
                        SsoError::Provider("No verified e-mail address on the GitHub account".to_string())
                    })?
            }
        };

        let identity = SsoIdentity {
            desired_username: gh.login.clone(),
            name: gh.name.clone().unwrap_or_else(|| gh.login.clone()),
            email,
            profile: UpdateUserProfile {
                github_username: Some(gh.login),
                ..Default::default()
            },
        };
        sso_login(pool, existing, &identity, registration_open).await
    }
}
