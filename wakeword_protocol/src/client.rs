use crate::protocol::{Connection, Message, ProtocolError, WakewordEvent};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

/// Blocking subscriber to a wake word detector service
pub struct WakewordClient {
    connection: Connection,
    server_address: String,
    read_timeout: Duration,
    is_subscribed: bool,
}

impl WakewordClient {
    /// Connect to the detector. `read_timeout` bounds how long
    /// [`WakewordClient::next_wakeword`] blocks before returning `None`.
    pub fn connect(address: &str, read_timeout: Duration) -> Result<Self, ProtocolError> {
        info!("Connecting to wakeword server at {}", address);
        let connection = Self::open(address, read_timeout)?;
        info!("Connected to wakeword server");

        Ok(WakewordClient {
            connection,
            server_address: address.to_string(),
            read_timeout,
            is_subscribed: false,
        })
    }

    fn open(address: &str, read_timeout: Duration) -> Result<Connection, ProtocolError> {
        let stream = TcpStream::connect(address)?;
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(Duration::from_secs(10)))?;
        Connection::new(stream)
    }

    pub fn subscribe(&mut self) -> Result<(), ProtocolError> {
        if self.is_subscribed {
            return Ok(());
        }

        debug!("Sending SubscribeWakeword");
        self.connection.write_message(&Message::SubscribeWakeword)?;

        match self.read_reply()? {
            Message::SubscribeResponse { success: true, .. } => {
                self.is_subscribed = true;
                info!("Subscribed to wakeword events");
                Ok(())
            }
            Message::SubscribeResponse { message, .. } => Err(ProtocolError::Rejected(message)),
            Message::ErrorResponse { error } => Err(ProtocolError::Rejected(error)),
            other => Err(ProtocolError::Unexpected(other.message_type())),
        }
    }

    pub fn unsubscribe(&mut self) -> Result<(), ProtocolError> {
        if !self.is_subscribed {
            return Ok(());
        }

        debug!("Sending UnsubscribeWakeword");
        self.connection.write_message(&Message::UnsubscribeWakeword)?;
        self.is_subscribed = false;

        match self.read_reply()? {
            Message::UnsubscribeResponse { success: true, .. } => Ok(()),
            Message::UnsubscribeResponse { message, .. } => Err(ProtocolError::Rejected(message)),
            Message::ErrorResponse { error } => Err(ProtocolError::Rejected(error)),
            other => Err(ProtocolError::Unexpected(other.message_type())),
        }
    }

    /// Replies may be preceded by detections already in flight
    fn read_reply(&mut self) -> Result<Message, ProtocolError> {
        loop {
            match self.connection.read_message()? {
                Message::WakewordEvent(event) => {
                    debug!("Discarding '{}' detection while awaiting reply", event.model_name);
                }
                reply => return Ok(reply),
            }
        }
    }

    /// Block until the next detection. Returns `None` when the read timeout
    /// elapses; a dropped connection is re-established and resubscribed.
    pub fn next_wakeword(&mut self) -> Result<Option<WakewordEvent>, ProtocolError> {
        if !self.is_subscribed {
            self.subscribe()?;
        }

        match self.connection.read_message() {
            Ok(Message::WakewordEvent(event)) => {
                debug!(
                    "Received wakeword '{}' confidence {:.3}",
                    event.model_name, event.confidence
                );
                Ok(Some(event))
            }
            Ok(Message::ErrorResponse { error }) => {
                warn!("Wakeword server error: {}", error);
                Ok(None)
            }
            Ok(message) => {
                warn!("Unexpected message while waiting for wakeword: {:?}", message);
                Ok(None)
            }
            Err(ProtocolError::Io(e)) => match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => Ok(None),
                ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted => {
                    info!("Wakeword connection closed by server, reconnecting");
                    self.reconnect()?;
                    Ok(None)
                }
                _ => Err(ProtocolError::Io(e)),
            },
            Err(e) => Err(e),
        }
    }

    pub fn reconnect(&mut self) -> Result<(), ProtocolError> {
        info!("Reconnecting to wakeword server at {}", self.server_address);
        self.connection = Self::open(&self.server_address, self.read_timeout)?;
        self.is_subscribed = false;
        self.subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.is_subscribed
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }
}
