//! Configuration module for the bridge bot.
//!
//! Handles environment-driven settings for the session lifecycle,
//! credential storage, and the bulk lookup engine.

mod settings;

pub use settings::{BridgeSettings, LookupSettings};

/// Maximum simultaneous outbound calls per user session.
pub const SESSION_LIMITER_CAPACITY: usize = 3;

/// Number of targets processed per bulk lookup batch.
pub const LOOKUP_BATCH_SIZE: usize = 20;

/// Upper bound on targets processed in a single bulk lookup invocation.
/// Anything beyond this is returned to the caller as unprocessed.
pub const MAX_TARGETS_PER_JOB: usize = 500;
