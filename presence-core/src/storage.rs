//! Persistent admin session token.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Key the admin token is stored under.
pub const TOKEN_KEY: &str = "adminToken";

const SESSION_FILE: &str = "session.json";

fn default_storage_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("presence");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".presence");
    }
    PathBuf::from("./data")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
    #[serde(default)]
    updated_at: String,
}

/// Small key/value file standing in for the browser's local storage.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn open_default() -> Self {
        Self::new(&default_storage_dir())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile> {
        if !self.path.exists() {
            return Ok(SessionFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("corrupt session file {:?}: {}", self.path, e)))
    }

    fn write(&self, mut session: SessionFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        session.updated_at = chrono::Utc::now().to_rfc3339();
        let content = serde_json::to_string_pretty(&session)
            .map_err(|e| Error::Config(format!("failed to serialize session: {}", e)))?;
        let mut file = open_private(&self.path)?;
        // An existing file keeps its old mode through open().
        restrict_permissions(&self.path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        let token = self.read()?.entries.get(TOKEN_KEY).cloned().filter(|t| !t.is_empty());
        debug!("Admin token {}", if token.is_some() { "present" } else { "absent" });
        Ok(token)
    }

    pub fn save_token(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Validation("Token must not be empty".to_string()));
        }
        let mut session = self.read()?;
        session.entries.insert(TOKEN_KEY.to_string(), token.to_string());
        self.write(session)?;
        info!("Saved admin token to {:?}", self.path);
        Ok(())
    }

    /// Returns whether a token was removed.
    pub fn clear_token(&self) -> Result<bool> {
        let mut session = self.read()?;
        if session.entries.remove(TOKEN_KEY).is_none() {
            return Ok(false);
        }
        self.write(session)?;
        info!("Removed admin token from {:?}", self.path);
        Ok(true)
    }
}

/// Create or truncate `path`, readable by the owner only from the start.
#[cfg(unix)]
fn open_private(path: &Path) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().write(true).create(true).truncate(true).open(path)?)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        assert_eq!(store.token().unwrap(), None);
        store.save_token("  abc123\n").unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("abc123"));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"adminToken\": \"abc123\""));

        assert!(store.clear_token().unwrap());
        assert!(!store.clear_token().unwrap());
        assert_eq!(store.token().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save_token("secret").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // A file left world-readable is tightened on the next write.
        fs::set_permissions(store.path(), fs::Permissions::from_mode(0o644)).unwrap();
        store.save_token("rotated").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.token().unwrap().as_deref(), Some("rotated"));
    }

    #[test]
    fn empty_token_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(matches!(store.save_token("   "), Err(Error::Validation(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.token(), Err(Error::Config(_))));
    }
}
