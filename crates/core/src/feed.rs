//! Change-feed abstraction: the stream of event notifications the watcher
//! consumes. Production wiring lives in `kevex-kubehub`.

use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Event;

/// One notification from the feed. Adds and updates are not distinguished.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Applied(Box<Event>),
    Deleted(Box<Event>),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Watch connection failure; the feed is expected to reconnect on its own.
    #[error("watch transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FeedError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into().into())
    }
}

pub trait ChangeFeed: Send {
    /// Consume the feed and return its notification stream. Transport errors
    /// are yielded in-band and do not end the stream.
    fn subscribe(self: Box<Self>) -> BoxStream<'static, Result<Notification, FeedError>>;
}

/// Any boxed stream of notifications is a feed (used by tests and adapters).
impl ChangeFeed for BoxStream<'static, Result<Notification, FeedError>> {
    fn subscribe(self: Box<Self>) -> BoxStream<'static, Result<Notification, FeedError>> {
        *self
    }
}
