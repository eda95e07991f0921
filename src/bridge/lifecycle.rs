//! Per-user connection lifecycle.
//!
//! Each user moves through `Disconnected → Connecting → Open →
//! (Closing | Reconnecting) → Disconnected`, driven by transport events
//! dispatched through a single function per session. A non-logout close
//! schedules reconnects indefinitely at a fixed delay; a logout is
//! terminal and tears the user's state down wholesale.
//!
//! Events from a replaced session are ignored: every session carries a
//! staleness token that is checked against the registry before any shared
//! state is touched.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::limiter::LimiterMap;
use super::notify::Notifier;
use super::registry::{PairingRequest, Session, SessionRegistry};
use crate::config::BridgeSettings;
use crate::lookup::format_phone_number;
use crate::store::{StoreError, UserId, UserStore};
use crate::transport::{
    AuthError, AuthManager, ConnectionEvent, DisconnectReason, Transport, TransportError,
};

/// Errors surfaced to callers of the lifecycle operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No live session for user {0}")]
    NoSession(UserId),
}

/// A pairing code issued for a phone number.
#[derive(Debug, Clone)]
pub struct PairingCode {
    pub code: String,
    pub phone: String,
}

/// Outcome of the startup auto-reconnect sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Active users with registered credentials.
    pub candidates: usize,
    /// Sessions that came up.
    pub connected: usize,
    /// Attempts that failed (isolated, logged).
    pub failed: usize,
}

/// Opens, supervises, and tears down per-user transport sessions.
///
/// Cheap to clone; all heavyweight state is shared behind `Arc`s so
/// spawned supervision tasks can carry their own copy.
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
    limiters: Arc<LimiterMap>,
    auth: AuthManager,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    settings: BridgeSettings,
}

impl ConnectionManager {
    /// Creates a manager over the given collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<SessionRegistry>,
        limiters: Arc<LimiterMap>,
        auth: AuthManager,
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            limiters,
            auth,
            users,
            notifier,
            settings,
        }
    }

    /// The session registry backing this manager.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Ensures a live session exists for the user, opening one from
    /// persisted credentials.
    ///
    /// A prior session for the same user is replaced in the registry; its
    /// pending events become stale and are ignored. Open failures surface
    /// to the caller.
    pub async fn ensure_connected(
        &self,
        user_id: UserId,
        phone: Option<&str>,
    ) -> Result<(), BridgeError> {
        let auth_state = self.auth.load(user_id).await?;

        let phone = phone
            .map(str::to_owned)
            .or_else(|| auth_state.creds.phone_number());
        match &phone {
            Some(phone) => debug!("Connecting user {} with phone {}", user_id, phone),
            None => debug!("Connecting user {} without a known phone yet", user_id),
        }

        let (handle, mut events) = self.transport.connect(&auth_state).await?;

        let session_id = self.registry.next_session_id();
        self.registry
            .set(
                user_id,
                Session {
                    session_id,
                    handle,
                    phone_number: phone,
                    open: false,
                    registered_at: Utc::now(),
                },
            )
            .await;

        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.dispatch_event(user_id, session_id, event).await;
            }
            debug!(
                "Event stream ended for user {} (session {})",
                user_id, session_id
            );
        });

        info!("Session created for user {} (session {})", user_id, session_id);
        Ok(())
    }

    /// Whether the user has a session in the open state.
    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.registry
            .get(user_id)
            .await
            .is_some_and(|session| session.open)
    }

    /// Clears leftover state so a fresh pairing starts from nothing:
    /// deletes stored credentials and drops any current session.
    pub async fn reset_pairing(&self, user_id: UserId) {
        info!("Resetting pairing state for user {}", user_id);
        if let Err(e) = self.auth.delete_user_auth(user_id).await {
            warn!("Could not delete old auth for user {}: {}", user_id, e);
        }
        self.registry.remove(user_id).await;
        self.registry.clear_pairing(user_id).await;
    }

    /// Requests a pairing code for the given phone number, opening a fresh
    /// socket (with a warm-up wait) when none exists yet.
    pub async fn request_pairing_code(
        &self,
        user_id: UserId,
        phone: &str,
        origin_chat: UserId,
    ) -> Result<PairingCode, BridgeError> {
        let formatted = format_phone_number(phone, &self.settings.default_country_code);

        if !self.registry.contains(user_id).await {
            self.ensure_connected(user_id, Some(&formatted)).await?;
            info!(
                "Waiting {}s for socket warm-up for user {}",
                self.settings.pairing_warmup_secs, user_id
            );
            tokio::time::sleep(self.settings.pairing_warmup()).await;
        }

        let session = self
            .registry
            .get(user_id)
            .await
            .ok_or(BridgeError::NoSession(user_id))?;

        let code = session
            .handle
            .request_pairing_code(&formatted, self.settings.custom_pairing_code.as_deref())
            .await?;

        self.registry
            .set_pairing(
                user_id,
                PairingRequest {
                    code: code.clone(),
                    phone: formatted.clone(),
                    origin_chat,
                    issued_at: Utc::now(),
                },
            )
            .await;

        info!("Pairing code issued for user {}: {}", user_id, formatted);
        Ok(PairingCode {
            code,
            phone: formatted,
        })
    }

    /// Cancels a pending pairing request, if any.
    pub async fn cancel_pairing(&self, user_id: UserId) {
        self.registry.clear_pairing(user_id).await;
    }

    /// Logs the user out (best effort) and tears down all session state.
    pub async fn disconnect(&self, user_id: UserId) {
        if let Some(session) = self.registry.get(user_id).await {
            if let Err(e) = session.handle.logout().await {
                warn!(
                    "Logout failed for user {}, device may already be unlinked: {}",
                    user_id, e
                );
            }
        } else {
            warn!("No session for user {}, cleaning up stored state only", user_id);
        }

        self.cleanup_session(user_id).await;
        info!("Disconnected and cleaned up user {}", user_id);
    }

    /// Tears down every live session; used on shutdown.
    pub async fn disconnect_all(&self) {
        for (user_id, _) in self.registry.list().await {
            self.disconnect(user_id).await;
        }
        info!("All user sessions disconnected");
    }

    /// Re-establishes sessions for every active user with registered
    /// credentials. Failures are isolated per user and reported through
    /// the summary, never propagated.
    pub async fn auto_reconnect_all(&self) -> SweepSummary {
        let users = match self.users.all_users().await {
            Ok(users) => users,
            Err(e) => {
                error!("Auto-reconnect sweep could not list users: {}", e);
                return SweepSummary::default();
            }
        };

        let mut candidates = Vec::new();
        for user in users.iter().filter(|u| u.is_active) {
            if self.auth.is_registered(user.user_id).await {
                candidates.push(user.user_id);
            }
        }

        if candidates.is_empty() {
            info!("No users with registered credentials to auto-connect");
            return SweepSummary::default();
        }

        info!("Auto-connecting {} users", candidates.len());

        let mut tasks = JoinSet::new();
        for user_id in &candidates {
            let manager = self.clone();
            let user_id = *user_id;
            tasks.spawn(async move {
                match manager.ensure_connected(user_id, None).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Auto-connect failed for user {}: {}", user_id, e);
                        false
                    }
                }
            });
        }

        let mut summary = SweepSummary {
            candidates: candidates.len(),
            ..SweepSummary::default()
        };
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.connected += 1,
                _ => summary.failed += 1,
            }
        }

        info!(
            "Auto-connect completed: {} connected, {} failed",
            summary.connected, summary.failed
        );
        summary
    }

    /// Single dispatch point for transport events. Events carrying a
    /// session token that no longer matches the registry are stale and
    /// ignored.
    async fn dispatch_event(&self, user_id: UserId, session_id: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => self.handle_open(user_id, session_id).await,
            ConnectionEvent::Close(reason) => self.handle_close(user_id, session_id, reason).await,
            ConnectionEvent::CredsUpdate(creds) => {
                if let Err(e) = self.auth.save(user_id, &creds).await {
                    error!("Failed to persist credentials for user {}: {}", user_id, e);
                }
            }
        }
    }

    async fn handle_open(&self, user_id: UserId, session_id: u64) {
        let Some(session) = self.registry.get(user_id).await else {
            debug!("Open event for user {} with no session, ignoring", user_id);
            return;
        };
        if session.session_id != session_id {
            debug!("Stale open event for user {}, ignoring", user_id);
            return;
        }

        let phone = session
            .phone_number
            .clone()
            .or_else(|| session.handle.user_jid().as_deref().and_then(phone_from_jid));

        self.registry
            .mark_open(user_id, session_id, phone.clone())
            .await;

        let Some(phone) = phone else {
            // The user stays connected, but pairing metadata is absent.
            error!(
                "Connection open for user {} but no phone number could be determined",
                user_id
            );
            return;
        };

        info!("Connection open for user {} ({})", user_id, phone);

        if let Err(e) = self.users.set_pairing(user_id, &phone).await {
            error!("Failed to mark user {} paired: {}", user_id, e);
        }

        if let Some(request) = self.registry.clear_pairing(user_id).await {
            let text = format!("WhatsApp connected: successfully paired with {phone}");
            if let Err(e) = self.notifier.notify(request.origin_chat, &text).await {
                error!("Failed to send pairing notification for user {}: {}", user_id, e);
            }
        }
    }

    async fn handle_close(
        &self,
        user_id: UserId,
        session_id: u64,
        reason: DisconnectReason,
    ) {
        if !self.registry.is_current(user_id, session_id).await {
            debug!("Stale close event for user {}, ignoring", user_id);
            return;
        }

        if reason.should_reconnect() {
            warn!(
                "Connection closed for user {} ({:?}), reconnecting in {}s",
                user_id, reason, self.settings.reconnect_delay_secs
            );
            self.schedule_reconnect(user_id, session_id);
        } else {
            warn!("Device logged out for user {}, cleaning up", user_id);
            self.cleanup_session(user_id).await;
        }
    }

    /// Reconnects after the fixed delay, retrying indefinitely. Each
    /// attempt re-derives the phone number from stored credentials when
    /// the closing session did not know it. The loop stops silently once
    /// a newer session supersedes the one that closed.
    fn schedule_reconnect(&self, user_id: UserId, session_id: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.settings.reconnect_delay()).await;

                if !manager.registry.is_current(user_id, session_id).await {
                    debug!("Reconnect for user {} superseded, stopping", user_id);
                    return;
                }

                let phone = manager
                    .registry
                    .get(user_id)
                    .await
                    .and_then(|s| s.phone_number);

                match manager.ensure_connected(user_id, phone.as_deref()).await {
                    Ok(()) => {
                        info!("Reconnected user {}", user_id);
                        return;
                    }
                    Err(e) => {
                        warn!("Reconnect failed for user {}, retrying: {}", user_id, e);
                    }
                }
            }
        });
    }

    /// Terminal cleanup: pending pairing, session, limiter, credentials,
    /// and the store's pairing flag. Store and filesystem failures are
    /// logged, not retried.
    async fn cleanup_session(&self, user_id: UserId) {
        self.registry.clear_pairing(user_id).await;
        self.registry.remove(user_id).await;
        self.limiters.remove(user_id).await;

        if let Err(e) = self.auth.delete_user_auth(user_id).await {
            warn!("Failed to delete credentials for user {}: {}", user_id, e);
        }
        if let Err(e) = self.users.clear_pairing(user_id).await {
            error!("Failed to clear pairing flag for user {}: {}", user_id, e);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Extracts the leading digits of a JID such as
/// `628123456789:12@s.whatsapp.net`.
fn phone_from_jid(jid: &str) -> Option<String> {
    let digits: String = jid
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() { None } else { Some(digits) }
}
