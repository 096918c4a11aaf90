use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

/// Largest accepted payload
pub const MAX_PAYLOAD: u32 = 64 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    #[error("Invalid payload size: {0}")]
    InvalidPayloadSize(u32),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server rejected request: {0}")]
    Rejected(String),

    #[error("Unexpected message: {0:?}")]
    Unexpected(MessageType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Client → Server
    SubscribeWakeword = 0x01,
    UnsubscribeWakeword = 0x02,

    // Server → Client
    WakewordEvent = 0x10,
    SubscribeResponse = 0x11,
    UnsubscribeResponse = 0x12,
    ErrorResponse = 0x13,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::SubscribeWakeword),
            0x02 => Ok(MessageType::UnsubscribeWakeword),
            0x10 => Ok(MessageType::WakewordEvent),
            0x11 => Ok(MessageType::SubscribeResponse),
            0x12 => Ok(MessageType::UnsubscribeResponse),
            0x13 => Ok(MessageType::ErrorResponse),
            _ => Err(ProtocolError::InvalidMessageType(value)),
        }
    }
}

/// A wake phrase detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WakewordEvent {
    /// Wake word model that fired
    pub model_name: String,
    /// Confidence score from 0.0 to 1.0
    pub confidence: f32,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub client_id: String,
}

impl WakewordEvent {
    pub fn new(model_name: String, confidence: f32, client_id: String) -> Self {
        Self {
            model_name,
            confidence,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            client_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Reply {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SubscribeWakeword,
    UnsubscribeWakeword,
    WakewordEvent(WakewordEvent),
    SubscribeResponse { success: bool, message: String },
    UnsubscribeResponse { success: bool, message: String },
    ErrorResponse { error: String },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::SubscribeWakeword => MessageType::SubscribeWakeword,
            Message::UnsubscribeWakeword => MessageType::UnsubscribeWakeword,
            Message::WakewordEvent(_) => MessageType::WakewordEvent,
            Message::SubscribeResponse { .. } => MessageType::SubscribeResponse,
            Message::UnsubscribeResponse { .. } => MessageType::UnsubscribeResponse,
            Message::ErrorResponse { .. } => MessageType::ErrorResponse,
        }
    }

    /// Encode as one frame
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Message::SubscribeWakeword | Message::UnsubscribeWakeword => Vec::new(),
            Message::WakewordEvent(event) => serde_json::to_vec(event)?,
            Message::SubscribeResponse { success, message }
            | Message::UnsubscribeResponse { success, message } => serde_json::to_vec(&Reply {
                success: *success,
                message: message.clone(),
            })?,
            Message::ErrorResponse { error } => serde_json::to_vec(&ErrorReply {
                error: error.clone(),
            })?,
        };

        let mut bytes = Vec::with_capacity(5 + payload.len());
        bytes.push(self.message_type() as u8);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(message_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        let message = match message_type {
            MessageType::SubscribeWakeword => Message::SubscribeWakeword,
            MessageType::UnsubscribeWakeword => Message::UnsubscribeWakeword,
            MessageType::WakewordEvent => Message::WakewordEvent(serde_json::from_slice(payload)?),
            MessageType::SubscribeResponse => {
                let reply: Reply = serde_json::from_slice(payload)?;
                Message::SubscribeResponse {
                    success: reply.success,
                    message: reply.message,
                }
            }
            MessageType::UnsubscribeResponse => {
                let reply: Reply = serde_json::from_slice(payload)?;
                Message::UnsubscribeResponse {
                    success: reply.success,
                    message: reply.message,
                }
            }
            MessageType::ErrorResponse => {
                let reply: ErrorReply = serde_json::from_slice(payload)?;
                Message::ErrorResponse { error: reply.error }
            }
        };
        Ok(message)
    }
}

/// Read one frame
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
    let mut type_byte = [0u8; 1];
    reader.read_exact(&mut type_byte)?;
    let message_type = MessageType::try_from(type_byte[0])?;

    let mut size_bytes = [0u8; 4];
    reader.read_exact(&mut size_bytes)?;
    let payload_size = u32::from_le_bytes(size_bytes);
    if payload_size > MAX_PAYLOAD {
        return Err(ProtocolError::InvalidPayloadSize(payload_size));
    }

    let mut payload = vec![0u8; payload_size as usize];
    reader.read_exact(&mut payload)?;
    Message::from_bytes(message_type, &payload)
}

/// Write one frame and flush
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    writer.write_all(&message.to_bytes()?)?;
    writer.flush()?;
    Ok(())
}

/// Buffered framing over a TCP stream
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let read_stream = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    pub fn read_message(&mut self) -> Result<Message, ProtocolError> {
        read_frame(&mut self.reader)
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        write_frame(&mut self.writer, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let bytes = Message::SubscribeWakeword.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x01, 0, 0, 0, 0]);

        let bytes = Message::ErrorResponse {
            error: "nope".to_string(),
        }
        .to_bytes()
        .unwrap();
        assert_eq!(bytes[0], 0x13);
        let size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        assert_eq!(size, bytes.len() - 5);
    }

    #[test]
    fn test_read_back_sequence() {
        let event = WakewordEvent::new("hey_computer".to_string(), 0.91, "kitchen".to_string());
        let mut buffer = Vec::new();
        write_frame(
            &mut buffer,
            &Message::SubscribeResponse {
                success: true,
                message: "ok".to_string(),
            },
        )
        .unwrap();
        write_frame(&mut buffer, &Message::WakewordEvent(event.clone())).unwrap();

        let mut cursor = Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            Message::SubscribeResponse { success: true, .. }
        ));
        assert_eq!(
            read_frame(&mut cursor).unwrap(),
            Message::WakewordEvent(event)
        );
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut cursor = Cursor::new(vec![0x7f, 0, 0, 0, 0]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ProtocolError::InvalidMessageType(0x7f))
        ));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let mut frame = vec![0x10];
        frame.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ProtocolError::InvalidPayloadSize(_))
        ));
    }
}
