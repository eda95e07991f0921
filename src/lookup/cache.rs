//! Result cache and in-flight request deduplication.

use std::collections::HashMap;

use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::bio::{BioCategory, BioResult};

/// Cache lifetime for a lookup result. Favorable results are stable and
/// cached longest; negative and throttled results retry sooner.
#[must_use]
pub(crate) const fn ttl_for(category: BioCategory) -> Duration {
    match category {
        BioCategory::HasBio => Duration::from_secs(3600),
        BioCategory::NoBio => Duration::from_secs(600),
        BioCategory::Unregistered => Duration::from_secs(300),
        BioCategory::RateLimit | BioCategory::Error => Duration::from_secs(60),
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    value: BioResult,
    expires_at: Instant,
}

/// TTL memoization of lookup results keyed by normalized phone number.
#[derive(Debug, Default)]
pub struct BioCache {
    entries: Mutex<HashMap<String, CacheSlot>>,
}

impl BioCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live cached result for a phone number. Expired entries
    /// are dropped, never served.
    pub async fn get(&self, phone: &str) -> Option<BioResult> {
        let mut entries = self.entries.lock().await;
        match entries.get(phone) {
            Some(slot) if slot.expires_at > Instant::now() => {
                debug!("Cache hit for {}", phone);
                Some(slot.value.clone())
            }
            Some(_) => {
                debug!("Cache entry expired for {}", phone);
                entries.remove(phone);
                None
            }
            None => None,
        }
    }

    /// Stores a result under its category TTL.
    pub async fn insert(&self, result: BioResult) {
        let expires_at = Instant::now() + ttl_for(result.category);
        debug!("Caching {} result for {}", result_label(&result), result.phone);
        self.entries.lock().await.insert(
            result.phone.clone(),
            CacheSlot {
                value: result,
                expires_at,
            },
        );
    }

    /// Returns the live entry for `phone`, or computes, stores, and
    /// returns a fresh one.
    pub async fn get_or_set<F, Fut>(&self, phone: &str, compute: F) -> BioResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BioResult>,
    {
        if let Some(cached) = self.get(phone).await {
            return cached;
        }
        let result = compute().await;
        self.insert(result.clone()).await;
        result
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, slot| slot.expires_at > now);
        before - entries.len()
    }

    /// Drops everything.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn result_label(result: &BioResult) -> &'static str {
    match result.category {
        BioCategory::HasBio => "has-bio",
        BioCategory::NoBio => "no-bio",
        BioCategory::Unregistered => "unregistered",
        BioCategory::RateLimit => "rate-limit",
        BioCategory::Error => "error",
    }
}

/// Deduplicates concurrent lookups of the same key.
///
/// The first caller for a key becomes the leader and runs the fetch;
/// callers arriving while it is in flight await the leader's result over
/// a oneshot channel instead of issuing a duplicate call.
#[derive(Debug, Default)]
pub struct RequestCache {
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<BioResult>>>>,
}

impl RequestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fetch` unless the same key is already in flight, in which
    /// case the in-flight result is awaited and shared.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> BioResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BioResult>,
    {
        let waiter = {
            let mut pending = self.pending.lock().await;
            if let Some(waiters) = pending.get_mut(key) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            } else {
                pending.insert(key.to_owned(), Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("Awaiting in-flight lookup for {}", key);
            if let Ok(result) = rx.await {
                return result;
            }
            // The leader was dropped before resolving; fetch directly.
            return fetch().await;
        }

        let result = fetch().await;
        let waiters = self.pending.lock().await.remove(key).unwrap_or_default();
        for tx in waiters {
            tx.send(result.clone()).ok();
        }
        result
    }

    /// Number of keys currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }
}
