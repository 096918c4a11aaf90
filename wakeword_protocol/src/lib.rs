//! # Wakeword Protocol
//!
//! TCP framing and a blocking client for receiving wake word detections from
//! an external detector service.
//!
//! Frames are `[message_type: u8][payload_size: u32 LE][payload]`, with JSON
//! payloads for the messages that carry data.
//!
//! ```rust,no_run
//! use wakeword_protocol::WakewordClient;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), wakeword_protocol::ProtocolError> {
//! let mut client = WakewordClient::connect("127.0.0.1:50052", Duration::from_secs(1))?;
//! client.subscribe()?;
//! loop {
//!     if let Some(event) = client.next_wakeword()? {
//!         println!("'{}' detected ({:.3})", event.model_name, event.confidence);
//!     }
//! }
//! # }
//! ```

pub mod client;
pub mod protocol;

pub use client::WakewordClient;
pub use protocol::{Connection, Message, MessageType, ProtocolError, WakewordEvent};
