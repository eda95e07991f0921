//! WhatsApp transport collaborator contract.
//!
//! The wire protocol itself lives in an external client library; this
//! module defines the surface the bridge core consumes from it — opening
//! a connection from persisted credentials, the connection event stream,
//! and the handful of lookup calls the bulk engine makes.

mod auth;
#[cfg(test)]
pub(crate) mod mock;

pub use auth::{AuthError, AuthManager, AuthState, Credentials, CredsIdentity};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the transport client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open connection: {0}")]
    Open(String),

    #[error("Pairing code request failed: {0}")]
    Pairing(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Logout failed: {0}")]
    Logout(String),

    #[error("Connection is no longer available")]
    Closed,
}

impl TransportError {
    /// Whether the error message carries a throttling signature.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        msg.contains("rate") || msg.contains("429") || msg.contains("overlimit")
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device was unlinked; credentials are no longer valid.
    LoggedOut,
    /// Any other closure (network drop, server restart, stream error).
    ConnectionLost(String),
}

impl DisconnectReason {
    /// Whether the lifecycle manager should schedule a reconnect.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Events emitted by a live connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection reached the open (authenticated) state.
    Open,
    /// The connection closed.
    Close(DisconnectReason),
    /// Credentials changed and must be persisted.
    CredsUpdate(Credentials),
}

/// Receiving end of a connection's event stream.
pub type EventReceiver = mpsc::Receiver<ConnectionEvent>;

/// One entry of a status (bio) fetch response.
#[derive(Debug, Clone, Default)]
pub struct StatusEntry {
    /// The bio text, if the account has one.
    pub status: Option<String>,

    /// When the bio was last set.
    pub set_at: Option<DateTime<Utc>>,
}

/// Result of an account-existence check.
#[derive(Debug, Clone)]
pub struct ContactCheck {
    pub jid: String,
    pub exists: bool,
}

/// Business metadata attached to an account.
#[derive(Debug, Clone, Default)]
pub struct BusinessProfile {
    pub business_name: Option<String>,
    pub verified_name: Option<String>,
    pub wid: Option<String>,
}

/// Opens connections from persisted credentials.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a connection, returning the live handle and its event stream.
    async fn connect(
        &self,
        auth: &AuthState,
    ) -> Result<(Arc<dyn TransportHandle>, EventReceiver), TransportError>;
}

/// A live connection to one WhatsApp account.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Requests a pairing code for the given phone number.
    async fn request_pairing_code(
        &self,
        phone: &str,
        custom_code: Option<&str>,
    ) -> Result<String, TransportError>;

    /// Unlinks the device and invalidates the credentials.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Fetches the status (bio) of an account.
    async fn fetch_status(&self, jid: &str) -> Result<Vec<StatusEntry>, TransportError>;

    /// Checks whether a JID is registered on WhatsApp.
    async fn on_whatsapp(&self, jid: &str) -> Result<Vec<ContactCheck>, TransportError>;

    /// Fetches the business profile of an account, if it has one.
    async fn business_profile(&self, jid: &str)
        -> Result<Option<BusinessProfile>, TransportError>;

    /// JID of the authenticated account, available once the connection is open.
    fn user_jid(&self) -> Option<String>;
}
