//! Shared state for every command: resolved config, token store and API
//! client construction.

use anyhow::{Context, Result};
use log::debug;
use std::path::Path;
use std::sync::Arc;

use presence_core::camera::{self, CameraBackend};
use presence_core::{ApiClient, ApiConfig, PresenceConfig, Resolution, TokenStore};

pub struct AppContext {
    pub config: PresenceConfig,
    pub store: TokenStore,
}

impl AppContext {
    pub fn load(config_path: Option<&Path>, api_url: Option<String>) -> Result<Self> {
        let mut config = PresenceConfig::discover(config_path).context("Failed to load configuration")?;
        if let Some(url) = api_url {
            debug!("API base URL overridden: {}", url);
            config.api.base_url = url;
        }

        Ok(Self {
            config,
            store: TokenStore::open_default(),
        })
    }

    /// Client for the public recognition endpoint.
    pub fn kiosk_client(&self) -> ApiClient {
        ApiClient::new(ApiConfig::from_settings(&self.config.api, None))
    }

    /// Client carrying the stored admin token. Fails when nobody is logged in.
    pub fn admin_client(&self) -> Result<ApiClient> {
        let token = self
            .store
            .token()
            .context("Failed to read the stored admin token")?
            .ok_or(presence_core::Error::NotLoggedIn)?;
        Ok(ApiClient::new(ApiConfig::from_settings(&self.config.api, Some(token))))
    }

    pub fn camera_backend(&self) -> Arc<dyn CameraBackend> {
        camera::default_backend(self.config.camera.device)
    }

    pub fn kiosk_resolution(&self) -> Resolution {
        Resolution::new(self.config.camera.kiosk_width, self.config.camera.kiosk_height)
    }

    pub fn enroll_resolution(&self) -> Resolution {
        Resolution::new(self.config.camera.enroll_width, self.config.camera.enroll_height)
    }
}
