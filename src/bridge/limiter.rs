//! Per-user concurrency limiter for outbound transport calls.
//!
//! Bounds how many lookups one user's session runs at the same time,
//! independent of the adaptive rate controller which paces temporal
//! spacing. Waiters are served in FIFO order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::store::UserId;

/// Counting semaphore with scoped acquisition.
///
/// `tokio::sync::Semaphore` is fair: queued waiters are released in
/// arrival order, and the permit guard releases the slot on every
/// outcome, including panics.
#[derive(Debug)]
pub struct SocketLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SocketLimiter {
    /// Creates a limiter with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot. The returned permit releases it on drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed.
            Err(_) => unreachable!("limiter semaphore closed"),
        }
    }

    /// Runs `f` while holding a slot, releasing it on any outcome.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }
}

/// Per-user limiter instances, created on demand and removed on logout.
#[derive(Debug)]
pub struct LimiterMap {
    capacity: usize,
    limiters: Mutex<HashMap<UserId, Arc<SocketLimiter>>>,
}

impl LimiterMap {
    /// Creates an empty map handing out limiters of the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the user's limiter, creating one if absent.
    pub async fn get_or_create(&self, user_id: UserId) -> Arc<SocketLimiter> {
        let mut limiters = self.limiters.lock().await;
        Arc::clone(limiters.entry(user_id).or_insert_with(|| {
            debug!("Created socket limiter for user {}", user_id);
            Arc::new(SocketLimiter::new(self.capacity))
        }))
    }

    /// Drops the user's limiter.
    pub async fn remove(&self, user_id: UserId) {
        if self.limiters.lock().await.remove(&user_id).is_some() {
            debug!("Removed socket limiter for user {}", user_id);
        }
    }

    pub async fn contains(&self, user_id: UserId) -> bool {
        self.limiters.lock().await.contains_key(&user_id)
    }
}
