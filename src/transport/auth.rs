//! Per-user credential storage.
//!
//! Each user gets a directory under the auth root holding the transport's
//! credential state. On logout the whole directory is deleted; pairing
//! state is derived from the `registered` flag inside the stored creds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::UserId;

const CREDS_FILE: &str = "creds.json";

/// Errors from credential storage.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Credential I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Identity block inside stored credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredsIdentity {
    /// Account id in `<digits>:<device>@s.whatsapp.net` form.
    pub id: String,

    #[serde(default)]
    pub jid: Option<String>,
}

/// Persisted credential state for one user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    /// Whether the pairing handshake has completed.
    #[serde(default)]
    pub registered: bool,

    /// Authenticated identity, present once registered.
    #[serde(default)]
    pub me: Option<CredsIdentity>,
}

impl Credentials {
    /// Extracts the account phone number from the stored identity.
    #[must_use]
    pub fn phone_number(&self) -> Option<String> {
        let me = self.me.as_ref()?;

        if let Some(digits) = me.id.split(':').next().filter(|s| !s.is_empty()) {
            return Some(digits.to_owned());
        }

        me.jid
            .as_deref()
            .and_then(|jid| jid.split('@').next())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    }
}

/// Loaded credential state plus the directory backing it.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub creds: Credentials,
    pub dir: PathBuf,
}

/// Manages per-user credential directories under one root.
#[derive(Debug, Clone)]
pub struct AuthManager {
    root: PathBuf,
}

impl AuthManager {
    /// Creates a manager rooted at the given directory.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding one user's credential state.
    #[must_use]
    pub fn user_auth_dir(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    fn creds_path(&self, user_id: UserId) -> PathBuf {
        self.user_auth_dir(user_id).join(CREDS_FILE)
    }

    /// Loads a user's credential state, defaulting to fresh (unregistered)
    /// creds when nothing is stored yet.
    pub async fn load(&self, user_id: UserId) -> Result<AuthState, AuthError> {
        let dir = self.user_auth_dir(user_id);
        let path = self.creds_path(user_id);

        let creds = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored credentials for user {}", user_id);
                Credentials::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(AuthState { creds, dir })
    }

    /// Persists updated credentials for a user.
    pub async fn save(&self, user_id: UserId, creds: &Credentials) -> Result<(), AuthError> {
        let dir = self.user_auth_dir(user_id);
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_string_pretty(creds)?;
        tokio::fs::write(self.creds_path(user_id), json).await?;
        debug!("Saved credentials for user {}", user_id);
        Ok(())
    }

    /// Deletes a user's credential directory wholesale.
    pub async fn delete_user_auth(&self, user_id: UserId) -> Result<(), AuthError> {
        let dir = self.user_auth_dir(user_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Deleted auth directory for user {}: {}", user_id, dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to delete auth for user {}: {}", user_id, e);
                Err(e.into())
            }
        }
    }

    /// Whether the user has stored credentials with a completed pairing.
    /// Load failures are reported as not registered.
    pub async fn is_registered(&self, user_id: UserId) -> bool {
        match self.load(user_id).await {
            Ok(state) => state.creds.registered,
            Err(e) => {
                debug!("Could not check pairing status for user {}: {}", user_id, e);
                false
            }
        }
    }

    /// Lists user ids that have a credential directory.
    pub async fn list_user_ids(&self) -> Result<Vec<UserId>, AuthError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<UserId>().ok())
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_manager() -> AuthManager {
        let root = std::env::temp_dir().join(format!(
            "wa_bridge_auth_{}_{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        AuthManager::new(root)
    }

    #[test]
    fn test_phone_from_identity_id() {
        let creds = Credentials {
            registered: true,
            me: Some(CredsIdentity {
                id: "628123456789:12@s.whatsapp.net".to_owned(),
                jid: None,
            }),
        };
        assert_eq!(creds.phone_number().as_deref(), Some("628123456789"));
    }

    #[test]
    fn test_phone_falls_back_to_jid() {
        let creds = Credentials {
            registered: true,
            me: Some(CredsIdentity {
                id: String::new(),
                jid: Some("628123456789@s.whatsapp.net".to_owned()),
            }),
        };
        assert_eq!(creds.phone_number().as_deref(), Some("628123456789"));
    }

    #[test]
    fn test_phone_absent_without_identity() {
        assert!(Credentials::default().phone_number().is_none());
    }

    #[tokio::test]
    async fn test_load_missing_defaults_unregistered() {
        let manager = temp_manager();
        let state = manager.load(1).await.unwrap();
        assert!(!state.creds.registered);
        assert!(!manager.is_registered(1).await);
    }

    #[tokio::test]
    async fn test_save_load_delete_roundtrip() {
        let manager = temp_manager();
        let creds = Credentials {
            registered: true,
            me: Some(CredsIdentity {
                id: "628111:1@s.whatsapp.net".to_owned(),
                jid: None,
            }),
        };

        manager.save(5, &creds).await.unwrap();
        assert!(manager.is_registered(5).await);
        assert_eq!(manager.list_user_ids().await.unwrap(), vec![5]);

        manager.delete_user_auth(5).await.unwrap();
        assert!(!manager.is_registered(5).await);
        assert!(manager.list_user_ids().await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&manager.root).await;
    }
}
