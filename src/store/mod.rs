//! Persistence collaborators.
//!
//! The bridge core reads and writes user records through the [`UserStore`]
//! trait; the bundled [`FileUserStore`] keeps everything in a single JSON
//! file. Deployments backed by an external key-value store implement the
//! same trait.

mod cooldown;
mod users;

pub use cooldown::{CooldownStatus, CooldownTracker};
pub use users::{FileUserStore, StoreError, UserRecord, UserRole, UserStore};

/// Identifier of a bridge user (the chat-platform user id).
pub type UserId = i64;
