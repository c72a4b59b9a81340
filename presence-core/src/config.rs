use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub recognition: RecognitionSettings,
    #[serde(default)]
    pub enrollment: EnrollmentSettings,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default)]
    pub device: i32,
    #[serde(default = "default_kiosk_width")]
    pub kiosk_width: u32,
    #[serde(default = "default_kiosk_height")]
    pub kiosk_height: u32,
    #[serde(default = "default_enroll_width")]
    pub enroll_width: u32,
    #[serde(default = "default_enroll_height")]
    pub enroll_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_status_expiry_ms")]
    pub status_expiry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSettings {
    #[serde(default = "default_max_captures")]
    pub max_captures: usize,
}

fn default_base_url() -> String { "http://localhost:5000".to_string() }
fn default_timeout_secs() -> f64 { 10.0 }
fn default_kiosk_width() -> u32 { 1280 }
fn default_kiosk_height() -> u32 { 720 }
fn default_enroll_width() -> u32 { 640 }
fn default_enroll_height() -> u32 { 480 }
fn default_jpeg_quality() -> u8 { 85 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_status_expiry_ms() -> u64 { 3000 }
fn default_max_captures() -> usize { 20 }

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            camera: CameraSettings::default(),
            recognition: RecognitionSettings::default(),
            enrollment: EnrollmentSettings::default(),
            version: 1,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: 0,
            kiosk_width: default_kiosk_width(),
            kiosk_height: default_kiosk_height(),
            enroll_width: default_enroll_width(),
            enroll_height: default_enroll_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            status_expiry_ms: default_status_expiry_ms(),
        }
    }
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            max_captures: default_max_captures(),
        }
    }
}

impl PresenceConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: PresenceConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config the way the CLI does: explicit path, then the
    /// user config, then the system config, then defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!("{} does not exist", path.display())));
            }
            return Self::load(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                log::debug!("Using config file {:?}", candidate);
                return Self::load(&candidate);
            }
        }

        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("presence").join("config.json"));
        }
        paths.push(PathBuf::from("/etc/presence/config.json"));
        paths
    }

    fn validate(&self) -> Result<()> {
        if self.recognition.poll_interval_ms == 0 {
            return Err(Error::Config("recognition.poll_interval_ms must be positive".into()));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(Error::Config("camera.jpeg_quality must be within 1..=100".into()));
        }
        if self.api.timeout_secs <= 0.0 || !self.api.timeout_secs.is_finite() {
            return Err(Error::Config("api.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.recognition.poll_interval_ms)
    }

    pub fn status_expiry(&self) -> Duration {
        Duration::from_millis(self.recognition.status_expiry_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.api.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PresenceConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.poll_interval(), Duration::from_millis(2000));
        assert_eq!(config.status_expiry(), Duration::from_millis(3000));
        assert_eq!(config.enrollment.max_captures, 20);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api": {"base_url": "http://kiosk.local:8080/"}, "camera": {"device": 2}}"#).unwrap();

        let config = PresenceConfig::load(&path).unwrap();
        assert_eq!(config.api.base_url, "http://kiosk.local:8080/");
        assert_eq!(config.api.timeout_secs, 10.0);
        assert_eq!(config.camera.device, 2);
        assert_eq!(config.camera.kiosk_width, 1280);
        assert_eq!(config.recognition.poll_interval_ms, 2000);
    }

    #[test]
    fn rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"recognition": {"poll_interval_ms": 0}}"#).unwrap();

        assert!(matches!(PresenceConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PresenceConfig::discover(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
