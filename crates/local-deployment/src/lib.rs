use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    config::{Config, load_config_from_file, save_config_to_file},
    sso::github::http_client,
};
use tokio::sync::RwLock;
use utils::assets::config_path;

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    http: reqwest::Client,
}

impl LocalDeployment {
    /// Deployment over an already opened database, used by tests and tooling.
    pub fn with_db(db: DBService, config: Config) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            db,
            http: http_client(),
        }
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let mut raw_config = load_config_from_file(&config_path()).await;

        // Environment overrides are applied after saving and never written back.
        save_config_to_file(&raw_config, &config_path()).await?;
        raw_config.apply_env();
        raw_config.validate()?;
        tracing::info!(
            "SSO providers enabled: {:?}, registration open: {}",
            raw_config.sso,
            raw_config.registration_open
        );

        let db = DBService::new().await?;
        Ok(Self::with_db(db, raw_config))
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
