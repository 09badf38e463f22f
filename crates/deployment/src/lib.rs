use std::{sync::Arc, time::Duration};

use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use db::{DBService, repositories::SessionRepository};
use services::services::{
    config::{Config, ConfigError, SsoProvider},
    sso::{DebianSso, GitHubSso},
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::sync::RwLock;

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

/// Application state shared by every request handler.
#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;

    fn db(&self) -> &DBService;

    /// Client shared by every outgoing provider call.
    fn http(&self) -> &reqwest::Client;

    /// GitHub client, when GitHub SSO is enabled and configured.
    async fn github_sso(&self) -> Option<GitHubSso> {
        let config = self.config().read().await;
        if !config.sso_enabled(SsoProvider::Github) {
            return None;
        }
        GitHubSso::from_config(&config.github, self.http())
    }

    async fn debian_sso(&self) -> Option<DebianSso> {
        let config = self.config().read().await;
        config
            .sso_enabled(SsoProvider::Debian)
            .then(|| DebianSso::from_config(&config.debian))
    }

    async fn registration_open(&self) -> bool {
        self.config().read().await.registration_open
    }

    /// Drop expired sessions now and then once an hour.
    async fn spawn_session_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let pool = self.db().pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                match SessionRepository::cleanup_expired(&pool).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!("Removed {} expired sessions", removed),
                    Err(e) => tracing::error!("Failed to clean up expired sessions: {}", e),
                }
            }
        })
    }
}
