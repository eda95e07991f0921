//! Per-user session management.
//!
//! The registry is the single source of truth for "current handle per
//! user"; the lifecycle manager drives the connection state machine and
//! the auto-reconnect sweep; the limiter bounds simultaneous outbound
//! calls per session.

mod lifecycle;
mod limiter;
mod notify;
mod registry;

pub use lifecycle::{BridgeError, ConnectionManager, PairingCode, SweepSummary};
#[cfg(test)]
pub(crate) use notify::recording;
pub use limiter::{LimiterMap, SocketLimiter};
pub use notify::{Notifier, NotifyError, NullNotifier};
pub use registry::{PairingRequest, Session, SessionRegistry};
