//! Session registry: live connection handles and pending pairing requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::UserId;
use crate::transport::TransportHandle;

/// One user's live session.
///
/// The registry owns the handle exclusively; everyone else re-reads the
/// current session before each transport call instead of caching it
/// across suspension points.
#[derive(Clone)]
pub struct Session {
    /// Monotonic token identifying this session instance. Event handlers
    /// compare it against the registered session before mutating shared
    /// state, so callbacks from a replaced handle are ignored.
    pub session_id: u64,

    /// The live transport handle.
    pub handle: Arc<dyn TransportHandle>,

    /// Phone number of the paired account, once known.
    pub phone_number: Option<String>,

    /// Whether the connection has reached the open state.
    pub open: bool,

    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("phone_number", &self.phone_number)
            .field("open", &self.open)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// A pairing code issued to a user, awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub code: String,
    pub phone: String,

    /// Chat to notify when the pairing completes.
    pub origin_chat: UserId,

    pub issued_at: DateTime<Utc>,
}

/// In-memory map of user id to live session plus pending pairing metadata.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_session_id: AtomicU64,
    sessions: Mutex<HashMap<UserId, Session>>,
    pairing: Mutex<HashMap<UserId, PairingRequest>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next session staleness token.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Stores a session, replacing any existing one for the user.
    /// The prior handle is silently orphaned; the caller is responsible
    /// for tearing it down first if a clean logout is wanted.
    pub async fn set(&self, user_id: UserId, session: Session) {
        let mut sessions = self.sessions.lock().await;
        if sessions.insert(user_id, session).is_some() {
            debug!("Replaced session for user {}", user_id);
        } else {
            debug!("Session set for user {}", user_id);
        }
    }

    /// Returns the current session for a user.
    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    /// Returns the current transport handle for a user.
    pub async fn handle(&self, user_id: UserId) -> Option<Arc<dyn TransportHandle>> {
        self.sessions
            .lock()
            .await
            .get(&user_id)
            .map(|s| Arc::clone(&s.handle))
    }

    /// Removes and returns a user's session.
    pub async fn remove(&self, user_id: UserId) -> Option<Session> {
        let removed = self.sessions.lock().await.remove(&user_id);
        if removed.is_some() {
            debug!("Session removed for user {}", user_id);
        }
        removed
    }

    /// Whether the given session token still identifies the registered
    /// session for this user.
    pub async fn is_current(&self, user_id: UserId, session_id: u64) -> bool {
        self.sessions
            .lock()
            .await
            .get(&user_id)
            .is_some_and(|s| s.session_id == session_id)
    }

    /// Marks the session open and records the phone number if newly known.
    /// No-op when the token no longer identifies the current session.
    pub async fn mark_open(&self, user_id: UserId, session_id: u64, phone: Option<String>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&user_id)
            && session.session_id == session_id
        {
            session.open = true;
            if phone.is_some() {
                session.phone_number = phone;
            }
        }
    }

    pub async fn contains(&self, user_id: UserId) -> bool {
        self.sessions.lock().await.contains_key(&user_id)
    }

    /// Snapshot of all sessions.
    pub async fn list(&self) -> Vec<(UserId, Session)> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    /// Records a pending pairing request, replacing any prior one.
    pub async fn set_pairing(&self, user_id: UserId, request: PairingRequest) {
        self.pairing.lock().await.insert(user_id, request);
        debug!("Pairing request recorded for user {}", user_id);
    }

    /// Returns the pending pairing request for a user.
    pub async fn pairing(&self, user_id: UserId) -> Option<PairingRequest> {
        self.pairing.lock().await.get(&user_id).cloned()
    }

    /// Removes and returns the pending pairing request for a user.
    pub async fn clear_pairing(&self, user_id: UserId) -> Option<PairingRequest> {
        let removed = self.pairing.lock().await.remove(&user_id);
        if removed.is_some() {
            debug!("Pairing request cleared for user {}", user_id);
        }
        removed
    }
}
