//! User records and the user store trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::UserId;

/// Errors from user store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read user store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse user store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("User {0} not found")]
    NotFound(UserId),
}

/// Access level of a bridge user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Time-limited evaluation access.
    #[default]
    Trial,
    /// Paying subscriber.
    Paid,
    /// Bot operator with unrestricted access.
    Owner,
}

/// A single user's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,

    #[serde(default)]
    pub role: UserRole,

    pub created_at: DateTime<Utc>,

    /// When access expires; `None` means permanent.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Phone number of the paired WhatsApp account, once known.
    #[serde(default)]
    pub whatsapp_phone: Option<String>,

    /// Whether a WhatsApp account is currently paired.
    #[serde(default)]
    pub whatsapp_paired: bool,

    /// Whether the subscription is active.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UserRecord {
    /// Creates a fresh record with the given role and optional expiry.
    #[must_use]
    pub fn new(user_id: UserId, role: UserRole, expiry_days: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            role,
            created_at: now,
            expires_at: expiry_days.map(|days| now + chrono::Duration::days(days)),
            whatsapp_phone: None,
            whatsapp_paired: false,
            is_active: true,
        }
    }

    /// Whether the record has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Utc::now())
    }
}

/// Read/write access to user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetches a user record, `None` if absent.
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Inserts or replaces a user record.
    async fn upsert(&self, record: UserRecord) -> Result<(), StoreError>;

    /// Marks the user as paired with the given phone number.
    async fn set_pairing(&self, user_id: UserId, phone: &str) -> Result<(), StoreError>;

    /// Clears the user's pairing flag and phone number.
    async fn clear_pairing(&self, user_id: UserId) -> Result<(), StoreError>;

    /// Returns all known user records.
    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError>;
}

/// JSON-file user store.
///
/// The whole map is rewritten on every mutation; record counts here are
/// small (one per subscriber), so simplicity wins over incremental writes.
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
    records: Mutex<HashMap<UserId, UserRecord>>,
}

impl FileUserStore {
    /// Opens the store, loading existing records if the file is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("User store {} not found, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Loaded user store from {} ({} records)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Creates an empty in-memory store that persists to the given path.
    #[must_use]
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn persist(&self, records: &HashMap<UserId, UserRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&user_id).cloned())
    }

    async fn upsert(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.insert(record.user_id, record);
        self.persist(&records)
    }

    async fn set_pairing(&self, user_id: UserId, phone: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound(user_id))?;
        record.whatsapp_paired = true;
        record.whatsapp_phone = Some(phone.to_owned());
        info!("Marked user {} paired with {}", user_id, phone);
        self.persist(&records)
    }

    async fn clear_pairing(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&user_id) else {
            warn!("Clear pairing requested for unknown user {}", user_id);
            return Ok(());
        };
        record.whatsapp_paired = false;
        record.whatsapp_phone = None;
        self.persist(&records)
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FileUserStore {
        let path = std::env::temp_dir().join(format!(
            "wa_bridge_users_{}_{}.json",
            std::process::id(),
            rand::random::<u32>()
        ));
        FileUserStore::empty(path)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = temp_store();
        let record = UserRecord::new(42, UserRole::Trial, Some(7));
        store.upsert(record).await.unwrap();

        let fetched = store.get_user(42).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, 42);
        assert_eq!(fetched.role, UserRole::Trial);
        assert!(!fetched.whatsapp_paired);
        assert!(!fetched.is_expired());

        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_set_and_clear_pairing() {
        let store = temp_store();
        store
            .upsert(UserRecord::new(7, UserRole::Paid, None))
            .await
            .unwrap();

        store.set_pairing(7, "628123456789").await.unwrap();
        let record = store.get_user(7).await.unwrap().unwrap();
        assert!(record.whatsapp_paired);
        assert_eq!(record.whatsapp_phone.as_deref(), Some("628123456789"));

        store.clear_pairing(7).await.unwrap();
        let record = store.get_user(7).await.unwrap().unwrap();
        assert!(!record.whatsapp_paired);
        assert!(record.whatsapp_phone.is_none());

        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_set_pairing_unknown_user() {
        let store = temp_store();
        let err = store.set_pairing(99, "628").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_clear_pairing_unknown_user_is_noop() {
        let store = temp_store();
        assert!(store.clear_pairing(99).await.is_ok());
    }

    #[test]
    fn test_expiry() {
        let mut record = UserRecord::new(1, UserRole::Trial, Some(1));
        assert!(!record.is_expired());

        record.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(record.is_expired());
    }
}
