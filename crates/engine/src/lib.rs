//! Polling notifier engines.
//!
//! Two workers share the same shape: a [`poller::Poller`] drives a background
//! cycle, a fetcher reads remote state, and a `Notifier` turns what changed
//! into chat messages. Inbound chat commands take a second path straight from
//! fetch to reply.

pub mod merge_requests;
pub mod poller;
pub mod sites;
pub mod tracker;

use async_trait::async_trait;

use chatwatch_common::error::AppError;
use chatwatch_common::types::InboundMessage;

pub use merge_requests::MergeRequestWatcher;
pub use sites::{ReportMode, SiteChecker};

/// A chat-bot worker as seen by the host.
///
/// The host constructs each worker explicitly, calls [`Worker::start`] once
/// at startup, and feeds every inbound message to [`Worker::process`].
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &'static str;

    /// Start the background loop. Idempotent; returns whether this call
    /// started it.
    fn start(&self) -> bool;

    /// Handle one inbound message. `Ok(false)` means it was not for this
    /// worker. Errors are for the host to log and surface.
    async fn process(&self, message: &InboundMessage) -> Result<bool, AppError>;
}
