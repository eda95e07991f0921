//! WhatsApp Bridge Bot Core
//!
//! Multi-tenant bridge core letting each chat-platform user pair and
//! operate one WhatsApp account through a shared process.
//!
//! This crate provides:
//! - Per-user connection lifecycle: pairing, auto-reconnect, logout
//! - A session registry tracking the current live handle per user
//! - Bulk bio lookups with batching, adaptive rate control, bounded
//!   per-user concurrency, and TTL result caching
//! - JSON-file persistence for user records and transport credentials
//!
//! The wire protocol and the chat frontend are external collaborators
//! behind the [`transport::Transport`], [`store::UserStore`], and
//! [`bridge::Notifier`] traits.

pub mod bridge;
pub mod config;
pub mod lookup;
pub mod store;
pub mod transport;
