use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::sync::RwLock;

use super::{Config, REFRESH_PATH};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("配置尚未加载")]
    NotInitialized,
    #[error("配置已经加载过")]
    AlreadyInitialized,
}

/// The one live configuration shared by the job and the refresh endpoint.
///
/// Everything except the upstream credential is fixed at startup. The
/// credential sits behind its own lock so readers of the other fields are
/// never blocked by a refresh.
#[derive(Debug)]
pub struct LiveConfig {
    settings: Config,
    authorization: RwLock<String>,
}

impl LiveConfig {
    pub fn new(mut settings: Config) -> Self {
        // The lock is the only source of truth for the credential.
        let authorization = std::mem::take(&mut settings.zhfd.authorization);

        Self {
            settings,
            authorization: RwLock::new(authorization),
        }
    }

    /// Immutable settings. `zhfd.authorization` is always empty here, use
    /// [`LiveConfig::authorization`] for the current value.
    pub fn settings(&self) -> &Config {
        &self.settings
    }

    pub async fn authorization(&self) -> String {
        self.authorization.read().await.clone()
    }

    pub async fn set_authorization(&self, value: String) {
        let mut current = self.authorization.write().await;
        *current = value;
    }

    /// Self-service link for a new credential. The caller appends the token.
    pub fn refresh_url(&self) -> String {
        format!(
            "http://{}:{}{}?re-send-mail=1&auth=",
            self.settings.server.public_host,
            self.settings.server.port,
            REFRESH_PATH,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    live: Arc<OnceLock<Arc<LiveConfig>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self, config: Config) -> Result<Arc<LiveConfig>, StoreError> {
        let live = Arc::new(LiveConfig::new(config));

        self.live
            .set(live.clone())
            .map_err(|_| StoreError::AlreadyInitialized)?;

        tracing::info!("Configuration cached");
        Ok(live)
    }

    pub fn get(&self) -> Result<Arc<LiveConfig>, StoreError> {
        self.live.get().cloned().ok_or(StoreError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.live.get().is_some()
    }

    pub async fn update_credential(&self, value: impl Into<String>) -> Result<(), StoreError> {
        let live = self.get()?;
        live.set_authorization(value.into()).await;
        tracing::info!("Upstream credential updated");
        Ok(())
    }
}
