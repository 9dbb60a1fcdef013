use async_trait::async_trait;

use crate::error::ArchivistError;
use crate::record::MessageEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Session established; `user_id` is the service's own account.
    Ready { user_id: u64, user_name: String },
    Message(MessageEvent),
    /// The transport dropped. The platform client may still reconnect.
    Disconnected,
    Resumed,
}

/// A live connection to the chat gateway, exclusively owned by the worker.
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Next event in delivery order, or `None` once the connection is gone.
    ///
    /// Must be cancel-safe: the worker races it against the stop signal.
    async fn next_event(&mut self) -> Option<GatewayEvent>;

    async fn send_text(&self, channel_id: u64, text: &str) -> Result<(), ArchivistError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: GatewayConnection + 'static;

    async fn connect(&self) -> Result<Self::Connection, ArchivistError>;
}
