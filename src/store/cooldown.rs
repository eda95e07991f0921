//! Per-action cooldown gate.
//!
//! Keeps heavy operations (bulk lookups, pairing retries) from being
//! spammed by a single user. Checks never block the user on internal
//! failure; the gate fails open.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use super::UserId;

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    /// Whether the action is currently on cooldown.
    pub on_cooldown: bool,

    /// Seconds remaining until the action is allowed again.
    pub remaining_secs: u64,
}

impl CooldownStatus {
    const CLEAR: Self = Self {
        on_cooldown: false,
        remaining_secs: 0,
    };
}

/// Tracks per-(user, action) cooldown windows in memory.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    windows: Mutex<HashMap<(UserId, String), Instant>>,
}

impl CooldownTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the cooldown for an action and, if clear, starts a new window.
    pub async fn check(
        &self,
        user_id: UserId,
        action: &str,
        duration: Duration,
    ) -> CooldownStatus {
        let mut windows = self.windows.lock().await;
        let key = (user_id, action.to_owned());

        if let Some(expires) = windows.get(&key) {
            let now = Instant::now();
            if *expires > now {
                let remaining = *expires - now;
                debug!(
                    "User {} on cooldown for {} ({}s remaining)",
                    user_id,
                    action,
                    remaining.as_secs()
                );
                return CooldownStatus {
                    on_cooldown: true,
                    remaining_secs: remaining.as_secs().max(1),
                };
            }
        }

        windows.insert(key, Instant::now() + duration);
        CooldownStatus::CLEAR
    }

    /// Clears any active cooldown for an action.
    pub async fn clear(&self, user_id: UserId, action: &str) {
        let mut windows = self.windows.lock().await;
        windows.remove(&(user_id, action.to_owned()));
    }

    /// Seconds remaining for an action, 0 if not on cooldown.
    pub async fn remaining(&self, user_id: UserId, action: &str) -> u64 {
        let windows = self.windows.lock().await;
        windows
            .get(&(user_id, action.to_owned()))
            .map_or(0, |expires| {
                expires.saturating_duration_since(Instant::now()).as_secs()
            })
    }
}
