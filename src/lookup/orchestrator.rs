//! Bulk lookup orchestration: batching, pacing, and result aggregation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::{LimiterMap, Notifier, SessionRegistry};
use crate::config::LookupSettings;
use crate::store::UserId;

use super::bio::{BioCategory, BioResult, fetch_bio};
use super::cache::{BioCache, RequestCache};
use super::rate::AdaptiveRateLimiter;

/// A job fails as a whole only when it cannot start; per-target failures
/// are folded into the report instead.
#[derive(Debug, Error)]
pub enum LookupJobError {
    #[error("No live WhatsApp session for user {0}; pair a device first")]
    NotConnected(UserId),
}

/// Aggregated outcome of one bulk lookup job.
///
/// The four buckets are disjoint and together cover every processed
/// target. Targets beyond the per-job cap are returned untouched in
/// `unprocessed`. Lookup errors share the `rate_limited` bucket.
#[derive(Debug, Default)]
pub struct LookupReport {
    pub has_bio: Vec<BioResult>,
    pub no_bio: Vec<BioResult>,
    pub unregistered: Vec<String>,
    pub rate_limited: Vec<String>,
    pub unprocessed: Vec<String>,
    pub total: usize,
    pub elapsed: Duration,
}

impl LookupReport {
    /// Number of targets that went through a lookup.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.has_bio.len() + self.no_bio.len() + self.unregistered.len() + self.rate_limited.len()
    }
}

/// Runs bulk bio lookups against a user's live session.
pub struct BulkLookupOrchestrator {
    registry: Arc<SessionRegistry>,
    limiters: Arc<LimiterMap>,
    cache: Arc<BioCache>,
    notifier: Arc<dyn Notifier>,
    settings: LookupSettings,
}

impl BulkLookupOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        limiters: Arc<LimiterMap>,
        cache: Arc<BioCache>,
        notifier: Arc<dyn Notifier>,
        settings: LookupSettings,
    ) -> Self {
        Self {
            registry,
            limiters,
            cache,
            notifier,
            settings,
        }
    }

    /// Looks up every target and aggregates the classified results.
    ///
    /// Targets are deduplicated, capped at the per-job maximum, and
    /// processed in fixed-size batches: one lookup at a time with a
    /// minimum spacing interval, a health-derived delay after each, and
    /// a cooldown plus scheduler yield between batches. Per-target
    /// failures never abort the job; the only job-level error is the
    /// absence of a live session at start.
    pub async fn run(
        &self,
        user_id: UserId,
        targets: &[String],
        report_progress: bool,
    ) -> Result<LookupReport, LookupJobError> {
        if self.registry.handle(user_id).await.is_none() {
            return Err(LookupJobError::NotConnected(user_id));
        }

        let mut seen = HashSet::new();
        let mut queue: Vec<&String> = targets.iter().filter(|t| seen.insert(*t)).collect();

        let mut report = LookupReport::default();
        if queue.len() > self.settings.max_targets {
            report.unprocessed = queue
                .split_off(self.settings.max_targets)
                .into_iter()
                .cloned()
                .collect();
            warn!(
                "User {} submitted {} targets over the cap; {} deferred",
                user_id,
                queue.len() + report.unprocessed.len(),
                report.unprocessed.len()
            );
        }
        report.total = queue.len();

        info!(
            "Starting bulk lookup for user {}: {} targets",
            user_id, report.total
        );

        let limiter = self.limiters.get_or_create(user_id).await;
        let in_flight = RequestCache::new();
        let mut rate = AdaptiveRateLimiter::from_settings(&self.settings);

        // Progress repaints at most once per this many processed targets.
        let progress_step = report.total.div_ceil(20).max(1);
        let mut last_progress = String::new();

        let started = Instant::now();
        let mut next_slot = started;
        let mut processed = 0;

        let batch_count = report.total.div_ceil(self.settings.batch_size.max(1));
        let batches = queue.chunks(self.settings.batch_size.max(1));

        for (batch_index, batch) in batches.enumerate() {
            debug!(
                "User {} batch {}/{} ({} targets)",
                user_id,
                batch_index + 1,
                batch_count,
                batch.len()
            );

            for &target in batch {
                tokio::time::sleep_until(next_slot).await;
                next_slot = Instant::now() + self.settings.dispatch_interval();

                // Re-read the current handle so a session replaced
                // mid-job is never used through a stale reference.
                let outcome = match self.registry.handle(user_id).await {
                    Some(handle) => {
                        in_flight
                            .get_or_fetch(target, || {
                                fetch_bio(&handle, &limiter, &self.cache, target)
                            })
                            .await
                    }
                    None => BioResult::lookup_error(target, "session closed mid-job"),
                };

                match outcome.category {
                    BioCategory::HasBio => {
                        rate.record_success();
                        report.has_bio.push(outcome);
                    }
                    BioCategory::NoBio => {
                        rate.record_success();
                        report.no_bio.push(outcome);
                    }
                    BioCategory::Unregistered => {
                        rate.record_success();
                        report.unregistered.push(outcome.phone);
                    }
                    BioCategory::RateLimit => {
                        rate.record_error(true);
                        report.rate_limited.push(outcome.phone);
                    }
                    BioCategory::Error => {
                        rate.record_error(false);
                        report.rate_limited.push(outcome.phone);
                    }
                }

                processed += 1;
                if report_progress && (processed % progress_step == 0 || processed == report.total)
                {
                    self.send_progress(user_id, &report, processed, rate.current_rate(), &mut last_progress)
                        .await;
                }

                tokio::time::sleep(rate.delay()).await;
            }

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.settings.batch_cooldown()).await;
                tokio::task::yield_now().await;
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Bulk lookup for user {} done: {}/{} processed in {:?} ({} bio, {} no bio, {} unregistered, {} limited)",
            user_id,
            report.processed(),
            report.total,
            report.elapsed,
            report.has_bio.len(),
            report.no_bio.len(),
            report.unregistered.len(),
            report.rate_limited.len(),
        );
        Ok(report)
    }

    /// Repaints the progress display, skipping unchanged text.
    async fn send_progress(
        &self,
        user_id: UserId,
        report: &LookupReport,
        processed: usize,
        current_rate: u32,
        last_progress: &mut String,
    ) {
        let percent = processed * 100 / report.total.max(1);
        let text = format!(
            "Checking {} numbers\n\
             Has bio: {}\n\
             No bio: {}\n\
             Unregistered: {}\n\
             Rate limited: {}\n\
             Progress: {processed}/{} ({percent}%) at {current_rate}/sec",
            report.total,
            report.has_bio.len(),
            report.no_bio.len(),
            report.unregistered.len(),
            report.rate_limited.len(),
            report.total,
        );

        if text == *last_progress {
            return;
        }
        if let Err(err) = self.notifier.update_progress(user_id, &text).await {
            debug!("Progress update for user {} failed: {}", user_id, err);
        }
        *last_progress = text;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    use chrono::Utc;

    use super::*;
    use crate::bridge::recording::RecordingNotifier;
    use crate::bridge::{NullNotifier, Session};
    use crate::transport::TransportHandle;
    use crate::transport::mock::{LookupScript, MockHandle};

    struct Fixture {
        orchestrator: BulkLookupOrchestrator,
        registry: Arc<SessionRegistry>,
        handle: Arc<MockHandle>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator = BulkLookupOrchestrator::new(
            Arc::clone(&registry),
            Arc::new(LimiterMap::new(3)),
            Arc::new(BioCache::new()),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            LookupSettings::default(),
        );
        let (handle, _rx) = MockHandle::new();
        Fixture {
            orchestrator,
            registry,
            handle,
            notifier,
        }
    }

    async fn register_session(fx: &Fixture, user_id: UserId) {
        fx.registry
            .set(
                user_id,
                Session {
                    session_id: fx.registry.next_session_id(),
                    handle: Arc::clone(&fx.handle) as Arc<dyn TransportHandle>,
                    phone_number: Some("628111".to_owned()),
                    open: true,
                    registered_at: Utc::now(),
                },
            )
            .await;
    }

    fn targets(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("6281100{i:04}")).collect()
    }

    #[tokio::test]
    async fn test_job_requires_live_session() {
        let fx = fixture();
        let err = fx
            .orchestrator
            .run(1, &targets(3), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupJobError::NotConnected(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buckets_partition_all_targets() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let input = targets(45);
        for (i, phone) in input.iter().enumerate() {
            let script = match i % 4 {
                0 => LookupScript::HasBio("hello"),
                1 => LookupScript::NoBio,
                2 => LookupScript::Unregistered,
                _ => LookupScript::RateLimited,
            };
            fx.handle.script(&format!("{phone}@s.whatsapp.net"), script);
        }

        let report = fx.orchestrator.run(1, &input, false).await.unwrap();

        assert_eq!(report.total, 45);
        assert_eq!(report.processed(), 45);
        assert_eq!(report.has_bio.len(), 12);
        assert_eq!(report.no_bio.len(), 11);
        assert_eq!(report.unregistered.len(), 11);
        assert_eq!(report.rate_limited.len(), 11);
        assert!(report.unprocessed.is_empty());

        let mut all: Vec<&str> = report
            .has_bio
            .iter()
            .map(|r| r.phone.as_str())
            .chain(report.no_bio.iter().map(|r| r.phone.as_str()))
            .chain(report.unregistered.iter().map(String::as_str))
            .chain(report.rate_limited.iter().map(String::as_str))
            .collect();
        all.sort_unstable();
        let distinct: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(distinct.len(), 45);
        let expected: HashSet<&str> = input.iter().map(String::as_str).collect();
        assert_eq!(distinct, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_cap_targets_are_deferred_untouched() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let input = targets(600);
        let report = fx.orchestrator.run(1, &input, false).await.unwrap();

        assert_eq!(report.total, 500);
        assert_eq!(report.processed(), 500);
        assert_eq!(report.unprocessed.len(), 100);
        assert_eq!(report.unprocessed, input[500..]);

        // Nothing in the deferred tail was looked up.
        let deferred: HashSet<&String> = report.unprocessed.iter().collect();
        for result in &report.no_bio {
            assert!(!deferred.contains(&result.phone));
        }
        assert_eq!(fx.handle.fetch_calls.load(Ordering::SeqCst), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_processed_once() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let mut input = targets(5);
        input.extend(targets(5));

        let report = fx.orchestrator.run(1, &input, false).await.unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.processed(), 5);
        assert_eq!(fx.handle.fetch_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_and_suppressed_when_unchanged() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let input = targets(45);
        fx.orchestrator.run(1, &input, true).await.unwrap();

        let progress = fx.notifier.progress.lock().unwrap();
        // Repaint cadence is every ceil(45/20) = 3 processed targets.
        assert!(!progress.is_empty());
        assert!(progress.len() <= 15);
        let (chat, last) = progress.last().unwrap();
        assert_eq!(*chat, 1);
        assert!(last.contains("45/45 (100%)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_progress_when_not_requested() {
        let fx = fixture();
        register_session(&fx, 1).await;

        fx.orchestrator.run(1, &targets(5), false).await.unwrap();
        assert!(fx.notifier.progress.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_spacing_paces_the_job() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let report = fx.orchestrator.run(1, &targets(5), false).await.unwrap();

        // Five targets in one batch, 200ms spacing between slots.
        assert!(report.elapsed >= Duration::from_millis(800));
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_cooldown_separates_batches() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let report = fx.orchestrator.run(1, &targets(45), false).await.unwrap();

        // 45 targets split 20/20/5. Slots inside a batch are 200ms
        // apart; each of the two batch boundaries adds the 500ms
        // cooldown on top of the post-target delay.
        assert!(report.elapsed >= Duration::from_millis(42 * 200 + 2 * 600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_served_from_cache_across_jobs() {
        let fx = fixture();
        register_session(&fx, 1).await;
        fx.handle.script_default(LookupScript::HasBio("hello"));

        let input = targets(3);
        fx.orchestrator.run(1, &input, false).await.unwrap();
        assert_eq!(fx.handle.fetch_calls.load(Ordering::SeqCst), 3);

        let report = fx.orchestrator.run(1, &input, false).await.unwrap();
        assert_eq!(report.has_bio.len(), 3);
        assert_eq!(fx.handle.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_mid_job_folds_to_limited_bucket() {
        let fx = fixture();
        register_session(&fx, 1).await;

        let orchestrator = fx.orchestrator;
        let registry = Arc::clone(&fx.registry);
        let input = targets(5);

        let job = tokio::spawn(async move { orchestrator.run(1, &input, false).await });

        // Let a couple of targets through, then drop the session.
        tokio::time::sleep(Duration::from_millis(450)).await;
        registry.remove(1).await;

        let report = job.await.unwrap().unwrap();
        assert_eq!(report.processed(), 5);
        assert!(!report.rate_limited.is_empty());
        assert!(report.no_bio.len() < 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_notifier_accepts_progress() {
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = BulkLookupOrchestrator::new(
            Arc::clone(&registry),
            Arc::new(LimiterMap::new(3)),
            Arc::new(BioCache::new()),
            Arc::new(NullNotifier),
            LookupSettings::default(),
        );
        let (handle, _rx) = MockHandle::new();
        registry
            .set(
                1,
                Session {
                    session_id: registry.next_session_id(),
                    handle: handle as Arc<dyn TransportHandle>,
                    phone_number: None,
                    open: true,
                    registered_at: Utc::now(),
                },
            )
            .await;

        let report = orchestrator.run(1, &targets(3), true).await.unwrap();
        assert_eq!(report.processed(), 3);
    }
}
