use thiserror::Error;

pub type Result<T> = std::result::Result<T, EdgeError>;

#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Resampler error: {0}")]
    Resample(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Wake source error: {0}")]
    Wake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for EdgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EdgeError::Transport(err.to_string())
    }
}

impl From<wakeword_protocol::ProtocolError> for EdgeError {
    fn from(err: wakeword_protocol::ProtocolError) -> Self {
        EdgeError::Wake(err.to_string())
    }
}

impl From<base64::DecodeError> for EdgeError {
    fn from(err: base64::DecodeError) -> Self {
        EdgeError::Protocol(format!("invalid base64 audio payload: {}", err))
    }
}
