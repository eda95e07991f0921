//! Notification seam towards the chat frontend.
//!
//! The core never formats menus or UI; it hands short status strings to
//! this trait and the frontend decides how to present them.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::store::UserId;

/// Errors from the delivery channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
}

/// Delivers status messages to a user's chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a one-off message.
    async fn notify(&self, chat: UserId, text: &str) -> Result<(), NotifyError>;

    /// Updates an in-place progress display. Implementations may edit a
    /// previous message; repeated identical text is already suppressed by
    /// the caller.
    async fn update_progress(&self, chat: UserId, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that drops everything; used by headless contexts such as the
/// startup sweep and the admin tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, chat: UserId, text: &str) -> Result<(), NotifyError> {
        debug!("Dropping notification for {}: {}", chat, text);
        Ok(())
    }

    async fn update_progress(&self, _chat: UserId, _text: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::{NotifyError, Notifier, UserId, async_trait};

    /// Test notifier that records every delivery.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) messages: Mutex<Vec<(UserId, String)>>,
        pub(crate) progress: Mutex<Vec<(UserId, String)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, chat: UserId, text: &str) -> Result<(), NotifyError> {
            self.messages.lock().unwrap().push((chat, text.to_owned()));
            Ok(())
        }

        async fn update_progress(&self, chat: UserId, text: &str) -> Result<(), NotifyError> {
            self.progress.lock().unwrap().push((chat, text.to_owned()));
            Ok(())
        }
    }
}
