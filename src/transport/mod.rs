//! Connection to the realtime conversational service.
//!
//! The session talks to the service through the [`Connector`], [`EventSink`]
//! and [`EventStream`] traits; [`websocket`] provides the real implementation.

pub mod events;
pub mod websocket;

pub use events::{decode_audio, ClientEvent, ServerEvent, ServiceError};
pub use websocket::WebSocketConnector;

use crate::error::Result;
use async_trait::async_trait;

/// Outbound half of an open connection
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<()>;

    /// Close the connection. Called at most once per connection.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of an open connection
#[async_trait]
pub trait EventStream: Send {
    /// Next parsed event, `None` once the connection has closed
    async fn next_event(&mut self) -> Option<Result<ServerEvent>>;
}

/// Opens one connection per session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>)>;
}
