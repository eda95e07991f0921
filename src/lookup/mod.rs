//! Bulk bio lookup engine.
//!
//! Batches large target lists, paces them through an adaptive rate
//! controller plus the per-user concurrency limiter, memoizes results
//! with category-dependent TTLs, and aggregates the outcome into four
//! report buckets.

mod bio;
mod cache;
mod orchestrator;
mod rate;

pub use bio::{
    AccountType, BioCategory, BioResult, BusinessInfo, format_phone_number, is_valid_phone_number,
    parse_targets, to_jid,
};
pub use cache::{BioCache, RequestCache};
pub use orchestrator::{BulkLookupOrchestrator, LookupJobError, LookupReport};
pub use rate::AdaptiveRateLimiter;
